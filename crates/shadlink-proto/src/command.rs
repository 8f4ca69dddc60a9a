use std::fmt;

/// How the worker applies the patch mask while scanning for `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchMask {
    #[default]
    None,
    Mask,
    MaskJump32,
}

impl PatchMask {
    pub fn as_int(self) -> i32 {
        match self {
            PatchMask::None => 0,
            PatchMask::Mask => 1,
            PatchMask::MaskJump32 => 2,
        }
    }

    pub fn from_int(v: i32) -> Option<Self> {
        match v {
            0 => Some(PatchMask::None),
            1 => Some(PatchMask::Mask),
            2 => Some(PatchMask::MaskJump32),
            _ => None,
        }
    }
}

/// A single memory patch pushed to a running worker.
///
/// `offset`, `value`, `target` and `size` are passed through as the patch
/// file spells them; the worker interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryPatch {
    pub mod_name: String,
    pub offset: String,
    pub value: String,
    pub target: String,
    pub size: String,
    pub is_offset: bool,
    pub little_endian: bool,
    pub mask: PatchMask,
    pub mask_offset: i32,
}

impl MemoryPatch {
    /// Parameter frames in wire order.
    fn params(&self) -> Vec<String> {
        vec![
            self.mod_name.clone(),
            self.offset.clone(),
            self.value.clone(),
            self.target.clone(),
            self.size.clone(),
            encode_bool(self.is_offset).to_string(),
            encode_bool(self.little_endian).to_string(),
            self.mask.as_int().to_string(),
            self.mask_offset.to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Run,
    Pause,
    Resume,
    Stop,
    Restart,
    ToggleFullscreen,
    AdjustVolume(i32),
    SetFsr(bool),
    SetRcas(bool),
    /// Thousandths; the worker divides by 1000.0.
    SetRcasAttenuation(i32),
    ReloadInputs(String),
    SetActivePad { index: i32, controller_id: String },
    SetActiveController(String),
    PatchMemory(MemoryPatch),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{command}: expected {expected} parameters, got {got}")]
    Arity {
        command: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{command}: {field} is not an integer: {value:?}")]
    InvalidInt {
        command: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{command}: {field} is not a boolean: {value:?}")]
    InvalidBool {
        command: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("PATCH_MEMORY: unknown mask kind {0}")]
    InvalidMask(i32),
}

const NAMES: &[(&str, usize)] = &[
    ("START", 0),
    ("RUN", 0),
    ("PAUSE", 0),
    ("RESUME", 0),
    ("STOP", 0),
    ("RESTART", 0),
    ("TOGGLE_FULLSCREEN", 0),
    ("ADJUST_VOLUME", 1),
    ("SET_FSR", 1),
    ("SET_RCAS", 1),
    ("SET_RCAS_ATTENUATION", 1),
    ("RELOAD_INPUTS", 1),
    ("SET_ACTIVE_PAD", 2),
    ("SET_ACTIVE_CONTROLLER", 1),
    ("PATCH_MEMORY", 9),
];

fn encode_bool(v: bool) -> &'static str {
    if v { "1" } else { "0" }
}

fn parse_int(command: &'static str, field: &'static str, raw: &str) -> Result<i32, DecodeError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DecodeError::InvalidInt {
            command,
            field,
            value: raw.to_string(),
        })
}

// Any integer is accepted; non-zero means true.
fn parse_bool(command: &'static str, field: &'static str, raw: &str) -> Result<bool, DecodeError> {
    raw.trim()
        .parse::<i64>()
        .map(|v| v != 0)
        .map_err(|_| DecodeError::InvalidBool {
            command,
            field,
            value: raw.to_string(),
        })
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Run => "RUN",
            Command::Pause => "PAUSE",
            Command::Resume => "RESUME",
            Command::Stop => "STOP",
            Command::Restart => "RESTART",
            Command::ToggleFullscreen => "TOGGLE_FULLSCREEN",
            Command::AdjustVolume(_) => "ADJUST_VOLUME",
            Command::SetFsr(_) => "SET_FSR",
            Command::SetRcas(_) => "SET_RCAS",
            Command::SetRcasAttenuation(_) => "SET_RCAS_ATTENUATION",
            Command::ReloadInputs(_) => "RELOAD_INPUTS",
            Command::SetActivePad { .. } => "SET_ACTIVE_PAD",
            Command::SetActiveController(_) => "SET_ACTIVE_CONTROLLER",
            Command::PatchMemory(_) => "PATCH_MEMORY",
        }
    }

    /// Fixed parameter count for a command name, `None` if the name is unknown.
    pub fn arity(name: &str) -> Option<usize> {
        NAMES.iter().find(|(n, _)| *n == name).map(|(_, a)| *a)
    }

    /// The command as wire frames: name first, then its parameters in order.
    pub fn to_frames(&self) -> Vec<String> {
        let mut out = vec![self.name().to_string()];
        match self {
            Command::Start
            | Command::Run
            | Command::Pause
            | Command::Resume
            | Command::Stop
            | Command::Restart
            | Command::ToggleFullscreen => {}
            Command::AdjustVolume(v) | Command::SetRcasAttenuation(v) => out.push(v.to_string()),
            Command::SetFsr(on) | Command::SetRcas(on) => out.push(encode_bool(*on).to_string()),
            Command::ReloadInputs(s) | Command::SetActiveController(s) => out.push(s.clone()),
            Command::SetActivePad {
                index,
                controller_id,
            } => {
                out.push(index.to_string());
                out.push(controller_id.clone());
            }
            Command::PatchMemory(p) => out.extend(p.params()),
        }
        out
    }

    /// Decodes a command from its name frame and exactly `arity(name)` parameters.
    pub fn decode(name: &str, params: &[String]) -> Result<Command, DecodeError> {
        let Some((name, expected)) = NAMES.iter().find(|(n, _)| *n == name).copied() else {
            return Err(DecodeError::Unknown(name.to_string()));
        };
        if params.len() != expected {
            return Err(DecodeError::Arity {
                command: name,
                expected,
                got: params.len(),
            });
        }

        let cmd = match name {
            "START" => Command::Start,
            "RUN" => Command::Run,
            "PAUSE" => Command::Pause,
            "RESUME" => Command::Resume,
            "STOP" => Command::Stop,
            "RESTART" => Command::Restart,
            "TOGGLE_FULLSCREEN" => Command::ToggleFullscreen,
            "ADJUST_VOLUME" => Command::AdjustVolume(parse_int(name, "volume", &params[0])?),
            "SET_FSR" => Command::SetFsr(parse_bool(name, "enabled", &params[0])?),
            "SET_RCAS" => Command::SetRcas(parse_bool(name, "enabled", &params[0])?),
            "SET_RCAS_ATTENUATION" => {
                Command::SetRcasAttenuation(parse_int(name, "attenuation", &params[0])?)
            }
            "RELOAD_INPUTS" => Command::ReloadInputs(params[0].clone()),
            "SET_ACTIVE_PAD" => Command::SetActivePad {
                index: parse_int(name, "pad_index", &params[0])?,
                controller_id: params[1].clone(),
            },
            "SET_ACTIVE_CONTROLLER" => Command::SetActiveController(params[0].clone()),
            "PATCH_MEMORY" => {
                let mask = parse_int(name, "mask", &params[7])?;
                Command::PatchMemory(MemoryPatch {
                    mod_name: params[0].clone(),
                    offset: params[1].clone(),
                    value: params[2].clone(),
                    target: params[3].clone(),
                    size: params[4].clone(),
                    is_offset: parse_bool(name, "is_offset", &params[5])?,
                    little_endian: parse_bool(name, "little_endian", &params[6])?,
                    mask: PatchMask::from_int(mask).ok_or(DecodeError::InvalidMask(mask))?,
                    mask_offset: parse_int(name, "mask_offset", &params[8])?,
                })
            }
            _ => return Err(DecodeError::Unknown(name.to_string())),
        };
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
