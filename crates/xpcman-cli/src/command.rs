//! Validation of parsed flags into executable invocations.
//!
//! Every command checks its required flags here, so the runtime only sees
//! requests that can be sent. Catalogue preconditions that belong to the core,
//! such as a positive pid, are checked again by the request builders.

use std::fs::{self, File};
use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use xpcman_ipc::{ControlAction, Dictionary, LookupNamespace, RestartPolicy, ServiceRequest};

use crate::cli::{Cli, CommandName};
use crate::errors::AppError;

/// A raw dictionary destined for a named service.
#[derive(Debug, PartialEq)]
pub(crate) struct SendInvocation {
    pub(crate) service: String,
    pub(crate) namespace: LookupNamespace,
    pub(crate) payload: Dictionary,
    pub(crate) expect_reply: bool,
}

#[derive(Debug, PartialEq)]
pub(crate) enum CommandInvocation {
    Catalogue(ServiceRequest),
    Send(SendInvocation),
    Listen,
}

impl TryFrom<Cli> for CommandInvocation {
    type Error = AppError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let command = cli.command.ok_or(AppError::MissingCommand)?;
        let request = match command {
            CommandName::List => ServiceRequest::List {
                name: non_empty(cli.service),
            },
            CommandName::Start | CommandName::Stop => ServiceRequest::Control {
                name: non_empty(cli.service).ok_or(AppError::MissingService)?,
                action: if command == CommandName::Start {
                    ControlAction::Start
                } else {
                    ControlAction::Stop
                },
            },
            CommandName::Load => ServiceRequest::Load {
                path: readable_file(cli.file)?,
            },
            CommandName::Unload => ServiceRequest::Unload {
                path: readable_file(cli.file)?,
            },
            CommandName::Status => ServiceRequest::Status {
                name: non_empty(cli.service).ok_or(AppError::MissingService)?,
            },
            CommandName::Procinfo => {
                if cli.pid == 0 {
                    return Err(AppError::MissingPid);
                }
                ServiceRequest::ProcInfo { pid: cli.pid }
            }
            CommandName::Submit => {
                let label = non_empty(cli.service).ok_or(AppError::MissingService)?;
                let program = non_empty(cli.program).ok_or(AppError::MissingProgram)?;
                ServiceRequest::Submit {
                    label,
                    program,
                    restart: RestartPolicy::from_keep_alive(cli.keepalive),
                }
            }
            CommandName::Send => return send_invocation(cli).map(Self::Send),
            CommandName::Listen => return Ok(Self::Listen),
        };
        Ok(Self::Catalogue(request))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn readable_file(file: Option<String>) -> Result<String, AppError> {
    let path = non_empty(file).ok_or(AppError::MissingFile)?;
    let unreadable = |source| AppError::UnreadableFile {
        path: path.clone(),
        source,
    };
    if !fs::metadata(&path).map_err(unreadable)?.is_file() {
        return Err(unreadable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    File::open(&path).map_err(unreadable)?;
    Ok(path)
}

fn send_invocation(cli: Cli) -> Result<SendInvocation, AppError> {
    let (Some(service), Some(data)) = (non_empty(cli.service), non_empty(cli.data)) else {
        return Err(AppError::MissingSendArguments);
    };
    let decoded = BASE64_STANDARD
        .decode(data.as_bytes())
        .map_err(AppError::DecodeData)?;
    let json: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(AppError::ParseData)?;
    let payload = Dictionary::from_json(json).map_err(AppError::InvalidPayload)?;
    Ok(SendInvocation {
        service,
        namespace: LookupNamespace::from_privileged(cli.privileged),
        payload,
        expect_reply: cli.expect_reply,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use rstest::rstest;
    use tempfile::NamedTempFile;
    use xpcman_ipc::Value;

    use super::*;

    fn cli(command: CommandName) -> Cli {
        Cli {
            command: Some(command),
            ..Cli::default()
        }
    }

    #[rstest]
    #[case(CommandName::Start)]
    #[case(CommandName::Stop)]
    #[case(CommandName::Status)]
    #[case(CommandName::Submit)]
    fn service_commands_require_a_service(#[case] command: CommandName) {
        let error = CommandInvocation::try_from(cli(command)).expect_err("service required");
        assert!(matches!(error, AppError::MissingService));
        assert!(error.shows_usage());
    }

    #[test]
    fn list_without_service_lists_everything() {
        let invocation = CommandInvocation::try_from(cli(CommandName::List)).expect("valid");
        assert_eq!(
            invocation,
            CommandInvocation::Catalogue(ServiceRequest::List { name: None })
        );
    }

    #[test]
    fn procinfo_requires_a_pid() {
        let error = CommandInvocation::try_from(cli(CommandName::Procinfo)).expect_err("pid");
        assert!(matches!(error, AppError::MissingPid));
    }

    #[test]
    fn load_requires_a_readable_file() {
        let missing = Cli {
            file: Some(String::from("/nonexistent/xpcman/job.plist")),
            ..cli(CommandName::Load)
        };
        let error = CommandInvocation::try_from(missing).expect_err("unreadable");
        assert!(matches!(error, AppError::UnreadableFile { .. }));
        assert!(!error.shows_usage());

        let mut plist = NamedTempFile::new().expect("temp file");
        writeln!(plist, "<plist/>").expect("write plist");
        let path = plist.path().to_string_lossy().into_owned();
        let present = Cli {
            file: Some(path.clone()),
            ..cli(CommandName::Unload)
        };
        assert_eq!(
            CommandInvocation::try_from(present).expect("readable"),
            CommandInvocation::Catalogue(ServiceRequest::Unload { path })
        );
    }

    #[test]
    fn load_rejects_a_directory() {
        let directory = tempfile::tempdir().expect("temp dir");
        let invocation = Cli {
            file: Some(directory.path().to_string_lossy().into_owned()),
            ..cli(CommandName::Load)
        };
        let error = CommandInvocation::try_from(invocation).expect_err("directory");
        assert!(matches!(error, AppError::UnreadableFile { .. }));
        assert!(error.to_string().contains("not a regular file"), "{error}");
    }

    #[test]
    fn send_decodes_base64_json() {
        let data = BASE64_STANDARD.encode(br#"{"op":"ping","n":18446744073709551615}"#);
        let invocation = CommandInvocation::try_from(Cli {
            service: Some(String::from("com.example.echo")),
            data: Some(data),
            privileged: true,
            ..cli(CommandName::Send)
        })
        .expect("valid send");
        let CommandInvocation::Send(send) = invocation else {
            panic!("expected a send invocation");
        };
        assert_eq!(send.namespace, LookupNamespace::Privileged);
        assert_eq!(send.payload.get_str("op"), Some("ping"));
        assert_eq!(send.payload.get("n"), Some(&Value::Uint64(u64::MAX)));
        assert!(!send.expect_reply);
    }

    #[rstest]
    #[case(None, Some("e30="))]
    #[case(Some("svc"), None)]
    fn send_requires_service_and_data(#[case] service: Option<&str>, #[case] data: Option<&str>) {
        let error = CommandInvocation::try_from(Cli {
            service: service.map(str::to_owned),
            data: data.map(str::to_owned),
            ..cli(CommandName::Send)
        })
        .expect_err("incomplete send");
        assert!(matches!(error, AppError::MissingSendArguments));
    }

    #[test]
    fn send_rejects_non_object_json() {
        let error = CommandInvocation::try_from(Cli {
            service: Some(String::from("svc")),
            data: Some(BASE64_STANDARD.encode(b"[1,2]")),
            ..cli(CommandName::Send)
        })
        .expect_err("array payload rejected");
        assert!(matches!(error, AppError::InvalidPayload(_)));
    }
}
