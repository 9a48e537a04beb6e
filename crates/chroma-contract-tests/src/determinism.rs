#![forbid(unsafe_code)]

#[cfg(test)]
mod tests {
    use chroma_controls::{ControlsConfig, FilterController};
    use chroma_runtime::{ChannelScale, RecordingSink};

    fn replay(keys: &str) -> (Vec<ChannelScale>, String) {
        let mut c = FilterController::from_config(&ControlsConfig::default());
        let mut sink = RecordingSink::default();
        for ch in keys.chars() {
            c.on_key(ch, &mut sink).expect("recording sink never fails");
        }
        (sink.applied, format!("{:?}", c.fields()))
    }

    /// Determinism contract:
    /// replaying the same keystrokes yields the same scale sequence and field text.
    #[test]
    fn key_replay_is_deterministic() {
        let keys = "c12\tc300g\u{8}\u{8}b-5x7";
        let (a_scales, a_fields) = replay(keys);
        let (b_scales, b_fields) = replay(keys);
        assert_eq!(a_scales, b_scales, "scale sequence must be stable");
        assert_eq!(a_fields, b_fields, "field text must be stable");
    }

    /// Reset returns to the exact starting scales regardless of history.
    #[test]
    fn reset_is_history_independent() {
        let (short, _) = replay("x");
        let (long, _) = replay("c9\tc\tc-1x");
        assert_eq!(short.last(), long.last());
        assert_eq!(short.last(), Some(&ChannelScale::IDENTITY));
    }
}
