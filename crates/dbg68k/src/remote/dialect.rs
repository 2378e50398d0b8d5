//! Stub dialect: capability negotiation and resume-packet encoding.

use super::thread::ThreadId;

/// The capability set we announce in `qSupported`.
pub const QSUPPORTED: &str =
    "qSupported:QStartNoAckMode+;multiprocess+;vContSupported+;QNonStop+";

/// Capabilities negotiated with the stub at connect time.
///
/// Scoped to one client instance; two connections may disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `multiprocess+`: thread ids marshal as `p<pid>.<tid>`.
    pub multiprocess: bool,
    /// `vContSupported+` and a matching `vCont?` reply: verbose resume.
    pub vcont: bool,
    /// `QStartNoAckMode+`: the `+`/`-` acknowledgement layer can be
    /// switched off.
    pub no_ack: bool,
    /// `QNonStop+`: the stub knows non-stop mode. Recorded only; the
    /// API keeps all-stop semantics.
    pub non_stop: bool,
    /// `qXfer:features:read+`: a target description is available.
    pub target_description: bool,
}

impl Capabilities {
    /// Interpret a `qSupported` reply.
    pub fn from_qsupported(reply: &str) -> Capabilities {
        Capabilities {
            multiprocess: reply.contains("multiprocess+"),
            vcont: reply.contains("vContSupported+"),
            no_ack: reply.contains("QStartNoAckMode+"),
            non_stop: reply.contains("QNonStop+"),
            target_description: reply.contains("qXfer:features:read+"),
        }
    }
}

/// A resume request, independent of the wire dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    Continue,
    StepIn,
    /// Step until the pc leaves `[start, end)`.
    StepRange { start: u32, end: u32 },
    Pause,
}

/// Encode a resume action as the packet payload sequence to send.
///
/// With verbose resume everything is a single `vCont` packet. The legacy
/// dialect first selects the thread with `Hc`, then sends the one-letter
/// operation; `legacy_range_step` opts into the stub-specific `n`
/// opcode, otherwise range stepping degrades to a plain step.
pub fn encode_resume(
    action: ResumeAction,
    caps: &Capabilities,
    tid: ThreadId,
    legacy_range_step: bool,
) -> Vec<String> {
    let tid = tid.marshal(caps.multiprocess);
    if caps.vcont {
        let packet = match action {
            ResumeAction::Continue => format!("vCont;c:{}", tid),
            ResumeAction::StepIn => format!("vCont;s:{}", tid),
            ResumeAction::StepRange { start, end } => {
                format!("vCont;r{:x},{:x}:{}", start, end, tid)
            }
            ResumeAction::Pause => format!("vCont;t:{}", tid),
        };
        return vec![packet];
    }
    match action {
        ResumeAction::Continue => vec![format!("Hc{}", tid), "c".to_string()],
        ResumeAction::StepIn => vec![format!("Hc{}", tid), "s".to_string()],
        ResumeAction::StepRange { .. } => {
            let op = if legacy_range_step { "n" } else { "s" };
            vec![format!("Hc{}", tid), op.to_string()]
        }
        // No per-thread stop without vCont; interrupt the target instead.
        ResumeAction::Pause => vec!["vCtrlC".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verbose() -> Capabilities {
        Capabilities {
            multiprocess: false,
            vcont: true,
            no_ack: true,
            non_stop: false,
            target_description: false,
        }
    }

    #[test]
    fn parse_qsupported_reply() {
        let caps = Capabilities::from_qsupported(
            "multiprocess+;vContSupported+;QStartNoAckMode+;QNonStop+",
        );
        assert!(caps.multiprocess);
        assert!(caps.vcont);
        assert!(caps.no_ack);
        assert!(caps.non_stop);
        assert!(!caps.target_description);

        let caps = Capabilities::from_qsupported("PacketSize=1000;vContSupported-");
        assert!(!caps.vcont);
        assert!(!caps.no_ack);
    }

    #[test]
    fn verbose_resume_encoding() {
        let tid = ThreadId::new(1);
        assert_eq!(
            encode_resume(ResumeAction::Continue, &verbose(), tid, false),
            vec!["vCont;c:01"]
        );
        assert_eq!(
            encode_resume(ResumeAction::StepIn, &verbose(), tid, false),
            vec!["vCont;s:01"]
        );
        assert_eq!(
            encode_resume(
                ResumeAction::StepRange {
                    start: 0x1000,
                    end: 0x1008
                },
                &verbose(),
                tid,
                false
            ),
            vec!["vCont;r1000,1008:01"]
        );
        assert_eq!(
            encode_resume(ResumeAction::Pause, &verbose(), tid, false),
            vec!["vCont;t:01"]
        );
    }

    #[test]
    fn multiprocess_ids_in_vcont() {
        let caps = Capabilities {
            multiprocess: true,
            ..verbose()
        };
        let tid = ThreadId::with_process(1, 15);
        assert_eq!(
            encode_resume(ResumeAction::StepIn, &caps, tid, false),
            vec!["vCont;s:p01.0f"]
        );
    }

    #[test]
    fn legacy_resume_encoding() {
        let caps = Capabilities::default();
        let tid = ThreadId::new(1);
        assert_eq!(
            encode_resume(ResumeAction::Continue, &caps, tid, false),
            vec!["Hc01", "c"]
        );
        assert_eq!(
            encode_resume(ResumeAction::StepIn, &caps, tid, false),
            vec!["Hc01", "s"]
        );
        assert_eq!(
            encode_resume(
                ResumeAction::StepRange { start: 0, end: 8 },
                &caps,
                tid,
                false
            ),
            vec!["Hc01", "s"]
        );
        assert_eq!(
            encode_resume(
                ResumeAction::StepRange { start: 0, end: 8 },
                &caps,
                tid,
                true
            ),
            vec!["Hc01", "n"]
        );
        assert_eq!(
            encode_resume(ResumeAction::Pause, &caps, tid, false),
            vec!["vCtrlC"]
        );
    }
}
