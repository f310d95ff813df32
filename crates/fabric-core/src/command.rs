//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Enumerated administrative command set."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Every operator action the fabric accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum AdminCommand {
    /// Latch a failure on each element.
    Fail { elements: Vec<String> },
    /// Clear injected failures and recover router elements.
    Recover { elements: Vec<String> },
    Status,
    /// Stop a router's routing daemon.
    KillDaemon { router: String },
    /// Disconnect switches from their controller.
    Detach { switches: Vec<String> },
    /// Reconnect switches to their controller.
    Attach { switches: Vec<String> },
    /// Stop a router's daemon, then disconnect switches from their controller.
    FailBoth { router: String, switches: Vec<String> },
}

impl AdminCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            AdminCommand::Fail { .. } => "fail",
            AdminCommand::Recover { .. } => "recover",
            AdminCommand::Status => "status",
            AdminCommand::KillDaemon { .. } => "kill-daemon",
            AdminCommand::Detach { .. } => "detach",
            AdminCommand::Attach { .. } => "attach",
            AdminCommand::FailBoth { .. } => "fail-both",
        }
    }

    fn arguments(&self) -> Vec<&str> {
        match self {
            AdminCommand::Fail { elements } | AdminCommand::Recover { elements } => {
                elements.iter().map(String::as_str).collect()
            }
            AdminCommand::Detach { switches } | AdminCommand::Attach { switches } => {
                switches.iter().map(String::as_str).collect()
            }
            AdminCommand::KillDaemon { router } => vec![router],
            AdminCommand::FailBoth { router, switches } => std::iter::once(router)
                .chain(switches)
                .map(String::as_str)
                .collect(),
            AdminCommand::Status => Vec::new(),
        }
    }
}

fn at_least_one(
    command: &'static str,
    argument: &'static str,
    words: Vec<String>,
) -> Result<Vec<String>, CommandError> {
    if words.is_empty() {
        return Err(CommandError::MissingArgument { command, argument });
    }
    Ok(words)
}

impl FromStr for AdminCommand {
    type Err = CommandError;

    /// Parse `verb [arg...]`. The historical verbs `failbgp`, `recoverbgp`, `failsdn`,
    /// `recoversdn` and `failboth` are accepted as aliases.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?;
        let rest: Vec<String> = words.map(str::to_owned).collect();
        match verb.to_ascii_lowercase().as_str() {
            "fail" => Ok(AdminCommand::Fail {
                elements: at_least_one("fail", "at least one element", rest)?,
            }),
            "recover" | "recoverbgp" => Ok(AdminCommand::Recover {
                elements: at_least_one("recover", "at least one element", rest)?,
            }),
            "status" => {
                if !rest.is_empty() {
                    return Err(CommandError::TooManyArguments {
                        command: "status",
                        expected: 0,
                        got: rest.len(),
                    });
                }
                Ok(AdminCommand::Status)
            }
            "kill-daemon" | "failbgp" => {
                let mut routers = at_least_one("kill-daemon", "a router", rest)?;
                if routers.len() > 1 {
                    return Err(CommandError::TooManyArguments {
                        command: "kill-daemon",
                        expected: 1,
                        got: routers.len(),
                    });
                }
                Ok(AdminCommand::KillDaemon {
                    router: routers.remove(0),
                })
            }
            "detach" | "failsdn" => Ok(AdminCommand::Detach {
                switches: at_least_one("detach", "at least one switch", rest)?,
            }),
            "attach" | "recoversdn" => Ok(AdminCommand::Attach {
                switches: at_least_one("attach", "at least one switch", rest)?,
            }),
            "fail-both" | "failboth" => {
                let mut words = at_least_one("fail-both", "a router", rest)?;
                let router = words.remove(0);
                Ok(AdminCommand::FailBoth {
                    router,
                    switches: at_least_one("fail-both", "at least one switch", words)?,
                })
            }
            _ => Err(CommandError::UnknownCommand(verb.to_owned())),
        }
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())?;
        for argument in self.arguments() {
            write!(f, " {argument}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_verb_and_alias() {
        assert_eq!(
            "fail spine1 bgp2".parse::<AdminCommand>().unwrap(),
            AdminCommand::Fail {
                elements: vec!["spine1".into(), "bgp2".into()]
            }
        );
        assert_eq!("  STATUS ".parse::<AdminCommand>().unwrap(), AdminCommand::Status);
        assert_eq!(
            "failbgp bgp1".parse::<AdminCommand>().unwrap(),
            AdminCommand::KillDaemon {
                router: "bgp1".into()
            }
        );
        assert_eq!(
            "failsdn leaf1 leaf2".parse::<AdminCommand>().unwrap().to_string(),
            "detach leaf1 leaf2"
        );
        assert_eq!(
            "recoversdn leaf1".parse::<AdminCommand>().unwrap(),
            AdminCommand::Attach {
                switches: vec!["leaf1".into()]
            }
        );
        assert_eq!(
            "recoverbgp bgp1".parse::<AdminCommand>().unwrap().verb(),
            "recover"
        );
        let both = "failboth bgp1 leaf1 leaf2".parse::<AdminCommand>().unwrap();
        assert_eq!(
            both,
            AdminCommand::FailBoth {
                router: "bgp1".into(),
                switches: vec!["leaf1".into(), "leaf2".into()]
            }
        );
        assert_eq!(both.to_string(), "fail-both bgp1 leaf1 leaf2");
    }

    #[test]
    fn rejects_unknown_and_incomplete_commands() {
        assert_eq!(
            "reboot spine1".parse::<AdminCommand>().unwrap_err(),
            CommandError::UnknownCommand("reboot".into())
        );
        assert_eq!("".parse::<AdminCommand>().unwrap_err(), CommandError::Empty);
        assert_eq!(
            "fail".parse::<AdminCommand>().unwrap_err(),
            CommandError::MissingArgument {
                command: "fail",
                argument: "at least one element"
            }
        );
        assert!(matches!(
            "kill-daemon bgp1 bgp2".parse::<AdminCommand>(),
            Err(CommandError::TooManyArguments { expected: 1, got: 2, .. })
        ));
        assert!("status now".parse::<AdminCommand>().is_err());
        assert_eq!(
            "fail-both bgp1".parse::<AdminCommand>().unwrap_err(),
            CommandError::MissingArgument {
                command: "fail-both",
                argument: "at least one switch"
            }
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let command = AdminCommand::Recover {
            elements: vec!["bgp1".into(), "spine2".into()],
        };
        assert_eq!(command.to_string().parse::<AdminCommand>().unwrap(), command);
    }
}
