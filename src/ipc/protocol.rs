use crate::errors::ProtocolError;

/// A parsed wire command. Parsing happens once at the edge (`parse`); every
/// downstream consumer matches on this instead of re-inspecting the raw
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Debug(String),
    Info(String),
    Critical(String),
    Loaded(u32),
    GetPids,
    Process(u32),
    Process2 { pid: u32, tid: u32 },
    FileNew(String),
    FileDel(String),
    FileMove { old: String, new: String },
}

/// Parses one `COMMAND:ARGUMENTS` line. Never panics: malformed input
/// becomes a typed `ProtocolError`.
pub fn parse(line: &str) -> Result<Command, ProtocolError> {
    let (command, args) = line
        .split_once(':')
        .ok_or(ProtocolError::MissingSeparator)?;

    match command.to_ascii_uppercase().as_str() {
        "DEBUG" => Ok(Command::Debug(args.to_string())),
        "INFO" => Ok(Command::Info(args.to_string())),
        "CRITICAL" => Ok(Command::Critical(args.to_string())),
        "LOADED" => Ok(Command::Loaded(parse_pid(args, "pid")?)),
        "GETPIDS" => Ok(Command::GetPids),
        "PROCESS" => Ok(Command::Process(parse_pid(args, "pid")?)),
        "PROCESS2" => parse_process2(args),
        "FILE_NEW" => Ok(Command::FileNew(args.to_string())),
        "FILE_DEL" => Ok(Command::FileDel(args.to_string())),
        "FILE_MOVE" => parse_file_move(args),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn parse_pid(raw: &str, field: &'static str) -> Result<u32, ProtocolError> {
    raw.trim()
        .parse()
        .map_err(|_| ProtocolError::NotANumber { field })
}

fn parse_process2(args: &str) -> Result<Command, ProtocolError> {
    let mut parts = args.splitn(3, ',');
    let pid_raw = parts.next().unwrap_or_default();
    let tid_raw = parts.next();
    let (tid_raw, extra) = match tid_raw {
        Some(tid) => (tid, parts.next()),
        None => {
            return Err(ProtocolError::WrongArgCount {
                command: "PROCESS2",
            })
        }
    };
    if extra.is_some() {
        return Err(ProtocolError::WrongArgCount {
            command: "PROCESS2",
        });
    }

    Ok(Command::Process2 {
        pid: parse_pid(pid_raw, "pid")?,
        tid: parse_pid(tid_raw, "tid")?,
    })
}

fn parse_file_move(args: &str) -> Result<Command, ProtocolError> {
    let mut parts = args.splitn(3, "::");
    let old = parts.next().unwrap_or_default();
    let new = match parts.next() {
        Some(n) => n,
        None => {
            return Err(ProtocolError::WrongArgCount {
                command: "FILE_MOVE",
            })
        }
    };
    if parts.next().is_some() {
        return Err(ProtocolError::WrongArgCount {
            command: "FILE_MOVE",
        });
    }

    Ok(Command::FileMove {
        old: old.to_string(),
        new: new.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_never_panics_on_arbitrary_input() {
        let samples = [
            "", ":", "GETPIDS", "LOADED:abc", "PROCESS2:1", "PROCESS2:1,2,3",
            "FILE_MOVE:no-separator", "FOO:bar", "debug:hello", "LOADED:1234",
        ];
        for s in samples {
            let _ = parse(s);
        }
    }

    #[test]
    fn debug_info_critical_roundtrip() {
        assert_eq!(parse("DEBUG:hi").unwrap(), Command::Debug("hi".into()));
        assert_eq!(parse("INFO:hi").unwrap(), Command::Info("hi".into()));
        assert_eq!(
            parse("CRITICAL:hi").unwrap(),
            Command::Critical("hi".into())
        );
        // commands are case-insensitive
        assert_eq!(parse("debug:hi").unwrap(), Command::Debug("hi".into()));
    }

    #[test]
    fn loaded_requires_digits() {
        assert_eq!(parse("LOADED:1234").unwrap(), Command::Loaded(1234));
        assert!(matches!(
            parse("LOADED:xx"),
            Err(ProtocolError::NotANumber { field: "pid" })
        ));
    }

    #[test]
    fn getpids_ignores_arguments() {
        assert_eq!(parse("GETPIDS:").unwrap(), Command::GetPids);
    }

    #[test]
    fn process_and_process2() {
        assert_eq!(parse("PROCESS:99").unwrap(), Command::Process(99));
        assert_eq!(
            parse("PROCESS2:99,5").unwrap(),
            Command::Process2 { pid: 99, tid: 5 }
        );
        assert!(matches!(
            parse("PROCESS2:99"),
            Err(ProtocolError::WrongArgCount { command: "PROCESS2" })
        ));
        assert!(matches!(
            parse("PROCESS2:99,5,1"),
            Err(ProtocolError::WrongArgCount { command: "PROCESS2" })
        ));
    }

    #[test]
    fn file_commands() {
        assert_eq!(
            parse("FILE_NEW:c:\\temp\\a.bin").unwrap(),
            Command::FileNew("c:\\temp\\a.bin".into())
        );
        assert_eq!(
            parse("FILE_DEL:c:\\temp\\a.bin").unwrap(),
            Command::FileDel("c:\\temp\\a.bin".into())
        );
        assert_eq!(
            parse("FILE_MOVE:c:\\a::c:\\b").unwrap(),
            Command::FileMove {
                old: "c:\\a".into(),
                new: "c:\\b".into(),
            }
        );
        assert!(matches!(
            parse("FILE_MOVE:no-double-colon"),
            Err(ProtocolError::WrongArgCount { command: "FILE_MOVE" })
        ));
    }

    #[test]
    fn missing_separator_and_unknown_command() {
        assert!(matches!(parse("NOCOLON"), Err(ProtocolError::MissingSeparator)));
        assert!(matches!(
            parse("FOO:bar"),
            Err(ProtocolError::UnknownCommand(ref c)) if c == "FOO"
        ));
    }
}
