use dmk_core::SmError;
use std::fmt::Display;

fn map_error(code: &'static str, error: impl Display) -> SmError {
    SmError::new(code, error.to_string())
}

fn json_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text.escape_default()))
}

pub(crate) fn emit_error(error: SmError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    if let Some(span) = &error.span {
        println!("ERROR_SPAN:{}", span);
    }
    println!("ERROR_MSG_JSON:{}", json_string(&error.message));
    1
}

pub(crate) fn map_cli_source_path(error: std::io::Error) -> SmError {
    map_error("CLI_SOURCE_PATH", error)
}

pub(crate) fn map_cli_source_scan(error: std::path::StripPrefixError) -> SmError {
    map_error("CLI_SOURCE_SCAN", error)
}

pub(crate) fn map_cli_source_read(error: std::io::Error) -> SmError {
    map_error("CLI_SOURCE_READ", error)
}

pub(crate) fn map_cli_output(error: serde_json::Error) -> SmError {
    map_error("CLI_OUTPUT", error)
}

#[cfg(test)]
mod error_map_tests {
    use super::*;

    #[test]
    fn emit_error_returns_non_zero_exit_code() {
        let code = emit_error(SmError::new("ERR", "failed"));
        assert_eq!(code, 1);
    }

    #[test]
    fn mapping_helpers_keep_error_codes() {
        assert_eq!(
            map_cli_source_path(std::io::Error::other("path")).code,
            "CLI_SOURCE_PATH"
        );
        assert_eq!(
            map_cli_source_read(std::io::Error::other("read")).code,
            "CLI_SOURCE_READ"
        );
        let strip_error = std::path::Path::new("a")
            .strip_prefix("b")
            .expect_err("prefix should not match");
        assert_eq!(map_cli_source_scan(strip_error).code, "CLI_SOURCE_SCAN");
        let json_error =
            serde_json::from_str::<serde_json::Value>("{").expect_err("json should be invalid");
        assert_eq!(map_cli_output(json_error).code, "CLI_OUTPUT");
    }

    #[test]
    fn messages_are_json_strings() {
        assert_eq!(json_string("say \"hi\"\n"), "\"say \\\"hi\\\"\\n\"");
    }
}
