//! Fixed message table for the stub's `E<hh>` reply codes.

/// Human-readable message for a two-hex-digit error code (without the
/// leading `E`). Unknown codes fall through to a generic message that
/// preserves the code.
pub fn message(code: &str) -> String {
    let known = match code.to_ascii_uppercase().as_str() {
        "01" => "General error during processing",
        "02" => "Error during the packet parse",
        "03" => "Unsupported / unknown command",
        "04" => "Unknown register",
        "05" => "Invalid frame id",
        "06" => "Invalid memory location",
        "07" => "Address not safe for a set memory command",
        "08" => "Unknown breakpoint",
        "09" => "The maximum of breakpoints have been reached",
        "0F" => "Error during the packet parse for command send memory",
        "10" => "Unknown register",
        "11" => "Invalid frame id",
        "12" => "Invalid memory location",
        "20" => "Error during the packet parse for command set memory",
        "21" => "Missing end packet for a set memory message",
        "22" => "Address not safe for a set memory command",
        "25" => "Error during the packet parse for command set register",
        "26" => "Error during set register - not supported",
        "30" => "Error during the packet parse for command get register",
        "31" => "Error during the vCont packet parse",
        "40" => "Unable to load segments",
        "41" => "Thread command parse error",
        _ => return format!("Error code received: '{}'", code),
    };
    known.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_code() {
        assert_eq!(message("05"), "Invalid frame id");
        assert_eq!(message("41"), "Thread command parse error");
    }

    #[test]
    fn unknown_code() {
        assert_eq!(message("7f"), "Error code received: '7f'");
    }
}
