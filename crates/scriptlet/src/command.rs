//! The `css` admin sub-command.

use crate::error::UsageError;

const RELOAD_USAGE: [&str; 2] = ["/css <reload/r> [using/u] [globals/g]", "/css <reload/r> all"];
const RESET_USAGE: [&str; 2] = ["/css reset [using/u] [options/o] [globals/g]", "/css reset all"];

/// A parsed admin request against the issuer's own session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Reload { imports: bool, globals: bool },
    Reset { imports: bool, options: bool, globals: bool },
}

#[derive(Default)]
struct Targets {
    imports: bool,
    options: bool,
    globals: bool,
}

/// Parses `reload|r <targets..>` or `reset <targets..>`, case-insensitively.
pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<AdminCommand, UsageError> {
    let Some((command, targets)) = args.split_first() else {
        return Err(UsageError::Command);
    };
    match command.as_ref().to_lowercase().as_str() {
        "reload" | "r" => {
            let t = parse_targets(targets, true).ok_or(UsageError::Reload)?;
            Ok(AdminCommand::Reload {
                imports: t.imports,
                globals: t.globals,
            })
        }
        "reset" => {
            let t = parse_targets(targets, false).ok_or(UsageError::Reset)?;
            Ok(AdminCommand::Reset {
                imports: t.imports,
                options: t.options,
                globals: t.globals,
            })
        }
        _ => Err(UsageError::Command),
    }
}

fn parse_targets<S: AsRef<str>>(args: &[S], for_reload: bool) -> Option<Targets> {
    if args.is_empty() {
        return None;
    }
    let mut targets = Targets::default();
    for arg in args {
        match arg.as_ref().to_lowercase().as_str() {
            "using" | "u" => targets.imports = true,
            "options" | "o" if !for_reload => targets.options = true,
            "globals" | "g" => targets.globals = true,
            "all" | "a" => {
                targets = Targets {
                    imports: true,
                    options: true,
                    globals: true,
                };
            }
            _ => return None,
        }
    }
    Some(targets)
}

/// Usage lines to show for a parse failure.
#[must_use]
pub fn usage(error: UsageError) -> Vec<&'static str> {
    match error {
        UsageError::Command => RELOAD_USAGE.iter().chain(&RESET_USAGE).copied().collect(),
        UsageError::Reload => RELOAD_USAGE.to_vec(),
        UsageError::Reset => RESET_USAGE.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reload_targets() {
        assert_eq!(
            parse(&["reload", "using"]),
            Ok(AdminCommand::Reload {
                imports: true,
                globals: false
            })
        );
        assert_eq!(
            parse(&["R", "g", "U"]),
            Ok(AdminCommand::Reload {
                imports: true,
                globals: true
            })
        );
        assert_eq!(
            parse(&["r", "all"]),
            Ok(AdminCommand::Reload {
                imports: true,
                globals: true
            })
        );
    }

    #[test]
    fn options_are_not_a_reload_target() {
        assert_eq!(parse(&["reload", "options"]), Err(UsageError::Reload));
        assert_eq!(parse(&["reload"]), Err(UsageError::Reload));
    }

    #[test]
    fn parses_reset_targets() {
        assert_eq!(
            parse(&["reset", "o", "globals"]),
            Ok(AdminCommand::Reset {
                imports: false,
                options: true,
                globals: true
            })
        );
        assert_eq!(
            parse(&["reset", "a"]),
            Ok(AdminCommand::Reset {
                imports: true,
                options: true,
                globals: true
            })
        );
        assert_eq!(parse(&["reset", "nothing"]), Err(UsageError::Reset));
    }

    #[test]
    fn unknown_command_shows_both_usages() {
        let empty: [&str; 0] = [];
        assert_eq!(parse(&empty), Err(UsageError::Command));
        assert_eq!(parse(&["restart"]), Err(UsageError::Command));
        assert_eq!(usage(UsageError::Command).len(), 4);
        assert_eq!(usage(UsageError::Reset), RESET_USAGE.to_vec());
    }
}
