//! Line commands typed on the launcher's own stdin.

use shadlink_proto::{MemoryPatch, PatchMask};

use crate::spawner::Spawner;
use crate::supervisor::Supervisor;

/// Placeholder for an empty text field in `patch`.
const EMPTY_FIELD: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Pause,
    Resume,
    Start,
    Stop,
    Restart,
    Fullscreen,
    Volume(i32),
    Fsr(bool),
    Rcas(bool),
    RcasAttenuation(i32),
    Inputs(String),
    Controller(String),
    Pad { index: i32, controller_id: String },
    Patch(MemoryPatch),
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("{field}: expected an integer, got {value:?}")]
    Int { field: &'static str, value: String },
    #[error("{field}: expected on/off, got {value:?}")]
    Switch { field: &'static str, value: String },
}

/// What the caller should do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn int(field: &'static str, value: &str) -> Result<i32, ParseError> {
    value.parse().map_err(|_| ParseError::Int {
        field,
        value: value.to_string(),
    })
}

fn switch(field: &'static str, value: &str) -> Result<bool, ParseError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(ParseError::Switch {
            field,
            value: value.to_string(),
        }),
    }
}

fn text(field: &str) -> String {
    if field == EMPTY_FIELD {
        String::new()
    } else {
        field.to_string()
    }
}

const PATCH_USAGE: &str =
    "patch NAME OFFSET VALUE TARGET SIZE IS_OFFSET(on|off) LITTLE_ENDIAN(on|off) MASK(0-2) MASK_OFFSET";

fn parse_patch(fields: &[&str]) -> Result<MemoryPatch, ParseError> {
    let [name, offset, value, target, size, is_offset, little_endian, mask, mask_offset] = fields
    else {
        return Err(ParseError::Usage(PATCH_USAGE));
    };
    let mask = int("mask", mask)?;
    Ok(MemoryPatch {
        mod_name: text(name),
        offset: text(offset),
        value: text(value),
        target: text(target),
        size: text(size),
        is_offset: switch("is_offset", is_offset)?,
        little_endian: switch("little_endian", little_endian)?,
        mask: PatchMask::from_int(mask).ok_or(ParseError::Usage("mask must be 0, 1 or 2"))?,
        mask_offset: int("mask_offset", mask_offset)?,
    })
}

/// Parses one console line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, rest)) = fields.split_first() else {
        return Ok(None);
    };

    let cmd = match (verb.to_ascii_lowercase().as_str(), rest) {
        ("pause", []) => ConsoleCommand::Pause,
        ("resume", []) => ConsoleCommand::Resume,
        ("start", []) => ConsoleCommand::Start,
        ("stop", []) => ConsoleCommand::Stop,
        ("restart", []) => ConsoleCommand::Restart,
        ("fullscreen", []) => ConsoleCommand::Fullscreen,
        ("status", []) => ConsoleCommand::Status,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        ("volume", [v]) => ConsoleCommand::Volume(int("volume", v)?),
        ("volume", _) => return Err(ParseError::Usage("volume N")),
        ("fsr", [v]) => ConsoleCommand::Fsr(switch("fsr", v)?),
        ("fsr", _) => return Err(ParseError::Usage("fsr on|off")),
        ("rcas", [v]) => ConsoleCommand::Rcas(switch("rcas", v)?),
        ("rcas", _) => return Err(ParseError::Usage("rcas on|off")),
        ("rcas-att", [v]) => ConsoleCommand::RcasAttenuation(int("rcas-att", v)?),
        ("rcas-att", _) => return Err(ParseError::Usage("rcas-att N")),
        ("inputs", [cfg]) => ConsoleCommand::Inputs(cfg.to_string()),
        ("inputs", _) => return Err(ParseError::Usage("inputs CONFIG")),
        ("controller", [guid]) => ConsoleCommand::Controller(guid.to_string()),
        ("controller", _) => return Err(ParseError::Usage("controller GUID")),
        ("pad", [index, id]) => ConsoleCommand::Pad {
            index: int("index", index)?,
            controller_id: id.to_string(),
        },
        ("pad", _) => return Err(ParseError::Usage("pad INDEX CONTROLLER_ID")),
        ("patch", fields) => ConsoleCommand::Patch(parse_patch(fields)?),
        (
            "pause" | "resume" | "start" | "stop" | "restart" | "fullscreen" | "status" | "quit"
            | "exit",
            _,
        ) => return Err(ParseError::Usage("command takes no arguments")),
        _ => return Err(ParseError::Unknown(verb.to_string())),
    };
    Ok(Some(cmd))
}

/// Runs a console command against the supervisor.
pub async fn dispatch<S: Spawner>(
    sup: &mut Supervisor<S>,
    cmd: ConsoleCommand,
) -> anyhow::Result<Flow> {
    match cmd {
        ConsoleCommand::Pause => sup.pause().await,
        ConsoleCommand::Resume => sup.resume().await,
        ConsoleCommand::Start => sup.send_start().await,
        ConsoleCommand::Stop => sup.stop().await,
        ConsoleCommand::Restart => sup.restart().await?,
        ConsoleCommand::Fullscreen => sup.toggle_fullscreen().await,
        ConsoleCommand::Volume(v) => sup.adjust_volume(v).await,
        ConsoleCommand::Fsr(on) => sup.set_fsr(on).await,
        ConsoleCommand::Rcas(on) => sup.set_rcas(on).await,
        ConsoleCommand::RcasAttenuation(v) => sup.set_rcas_attenuation(v).await,
        ConsoleCommand::Inputs(cfg) => sup.reload_inputs(cfg).await,
        ConsoleCommand::Controller(guid) => sup.set_active_controller(guid).await,
        ConsoleCommand::Pad {
            index,
            controller_id,
        } => sup.set_active_pad(index, controller_id).await,
        ConsoleCommand::Patch(patch) => sup.apply_memory_patch(patch).await,
        ConsoleCommand::Status => {
            println!("{}", serde_json::to_string_pretty(&sup.status())?);
        }
        ConsoleCommand::Quit => {
            sup.stop().await;
            return Ok(Flow::Quit);
        }
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_verbs() {
        assert_eq!(parse("pause").unwrap(), Some(ConsoleCommand::Pause));
        assert_eq!(parse("  RESUME ").unwrap(), Some(ConsoleCommand::Resume));
        assert_eq!(parse("exit").unwrap(), Some(ConsoleCommand::Quit));
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn arguments_are_typed() {
        assert_eq!(parse("volume 75").unwrap(), Some(ConsoleCommand::Volume(75)));
        assert_eq!(parse("fsr off").unwrap(), Some(ConsoleCommand::Fsr(false)));
        assert_eq!(parse("rcas ON").unwrap(), Some(ConsoleCommand::Rcas(true)));
        assert_eq!(
            parse("pad 2 030000005e040000").unwrap(),
            Some(ConsoleCommand::Pad {
                index: 2,
                controller_id: "030000005e040000".to_string()
            })
        );
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(matches!(
            parse("volume loud"),
            Err(ParseError::Int { field: "volume", .. })
        ));
        assert!(matches!(parse("fsr maybe"), Err(ParseError::Switch { .. })));
        assert!(matches!(parse("pause now"), Err(ParseError::Usage(_))));
        assert!(matches!(parse("inputs"), Err(ParseError::Usage(_))));
        assert_eq!(
            parse("jump"),
            Err(ParseError::Unknown("jump".to_string()))
        );
    }

    #[test]
    fn patch_takes_nine_fields() {
        let cmd = parse("patch 60fps 0x1000 0x3C - 4 on off 2 -8").unwrap();
        let Some(ConsoleCommand::Patch(p)) = cmd else {
            panic!("expected patch, got {cmd:?}");
        };
        assert_eq!(p.mod_name, "60fps");
        assert_eq!(p.target, "");
        assert!(p.is_offset);
        assert!(!p.little_endian);
        assert_eq!(p.mask, PatchMask::MaskJump32);
        assert_eq!(p.mask_offset, -8);

        assert!(matches!(parse("patch a b c"), Err(ParseError::Usage(_))));
        assert!(matches!(
            parse("patch n o v t s on on 7 0"),
            Err(ParseError::Usage(_))
        ));
    }
}
