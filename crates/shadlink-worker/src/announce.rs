use std::io::{self, Write};

use shadlink_proto::{
    CONTROL_PREFIX, Capability,
    handshake::{IPC_ENABLED, IPC_END},
    restart,
};

/// Announcements that carry no capability but tell the launcher which
/// input-routing commands this worker accepts.
const INPUT_ANNOUNCEMENTS: [&str; 2] = ["SET_ACTIVE_PAD", "SET_ACTIVE_CONTROLLER"];

/// Writes `;`-prefixed control frames to the launcher. In a real worker the
/// sink is stderr.
pub struct ControlWriter<W: Write> {
    out: W,
}

impl<W: Write> ControlWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn frame(&mut self, payload: &str) -> io::Result<()> {
        writeln!(self.out, "{CONTROL_PREFIX}{payload}")
    }

    /// Sends the whole handshake for `capabilities` and flushes.
    pub fn handshake(&mut self, capabilities: &[Capability]) -> io::Result<()> {
        self.frame(IPC_ENABLED)?;
        for cap in capabilities {
            self.frame(&cap.announce_frame())?;
        }
        for name in INPUT_ANNOUNCEMENTS {
            self.frame(name)?;
        }
        self.frame(IPC_END)?;
        self.out.flush()
    }

    /// Asks the launcher to relaunch this worker with `args`.
    pub fn request_restart(&mut self, args: &[String]) -> io::Result<()> {
        for f in restart::request_frames(args) {
            self.frame(&f)?;
        }
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(w: ControlWriter<Vec<u8>>) -> Vec<String> {
        String::from_utf8(w.into_inner())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn full_handshake() {
        let mut w = ControlWriter::new(Vec::new());
        w.handshake(&Capability::ALL).unwrap();
        assert_eq!(
            lines(w),
            vec![
                ";#IPC_ENABLED",
                ";ENABLE_MEMORY_PATCH",
                ";ENABLE_EMU_CONTROL",
                ";SET_ACTIVE_PAD",
                ";SET_ACTIVE_CONTROLLER",
                ";#IPC_END",
            ]
        );
    }

    #[test]
    fn restart_request_frames() {
        let mut w = ControlWriter::new(Vec::new());
        w.request_restart(&["-g".to_string(), "CUSA00002".to_string()])
            .unwrap();
        assert_eq!(lines(w), vec![";RESTART", ";2", ";-g", ";CUSA00002"]);
    }
}
