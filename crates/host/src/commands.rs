/// A line typed at the host prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Connect(String),
    Disconnect,
    RecordStart,
    RecordStop,
    Note(String),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  list               discovered devices
  connect <id>       connect to a device
  disconnect         end the current session
  record start|stop  start or stop SD card recording
  note <text>        send a user note
  status             session state and counters
  quit               stop the host and exit";

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "list" | "ls" => Command::List,
        "connect" if rest.is_empty() => return Err("usage: connect <device id>".to_string()),
        "connect" => Command::Connect(rest.to_string()),
        "disconnect" => Command::Disconnect,
        "record" => match rest {
            "start" => Command::RecordStart,
            "stop" => Command::RecordStop,
            _ => return Err("usage: record start|stop".to_string()),
        },
        "note" if rest.is_empty() => return Err("usage: note <text>".to_string()),
        "note" => Command::Note(rest.to_string()),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line_is_not_a_command() {
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn test_arguments_keep_inner_spaces() {
        assert_eq!(
            parse("note  lap two done "),
            Ok(Some(Command::Note("lap two done".to_string())))
        );
        assert_eq!(
            parse("CONNECT MD-V4-0000123"),
            Ok(Some(Command::Connect("MD-V4-0000123".to_string())))
        );
    }

    #[test]
    fn test_record_needs_direction() {
        assert_eq!(parse("record start"), Ok(Some(Command::RecordStart)));
        assert_eq!(parse("record stop"), Ok(Some(Command::RecordStop)));
        assert!(parse("record").is_err());
    }

    #[test]
    fn test_missing_argument_and_unknown_command() {
        assert!(parse("connect").is_err());
        assert!(parse("note").is_err());
        assert!(parse("kick 3").unwrap_err().contains("kick"));
    }
}
