use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use chroma_runtime::{normalize_channel_input, ChannelScale, ChannelScaleSink, EngineError};

/// One of the three editable filter channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Red => "red",
            Channel::Green => "green",
            Channel::Blue => "blue",
        }
    }

    /// Accepts the full name or its first letter.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "red" | "r" => Some(Channel::Red),
            "green" | "g" => Some(Channel::Green),
            "blue" | "b" => Some(Channel::Blue),
            _ => None,
        }
    }

    fn next(self) -> Self {
        match self {
            Channel::Red => Channel::Green,
            Channel::Green => Channel::Blue,
            Channel::Blue => Channel::Red,
        }
    }
}

/// Raw text of the three filter inputs, exactly as typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterFields {
    #[serde(default = "full_intensity")]
    pub red: String,
    #[serde(default = "full_intensity")]
    pub green: String,
    #[serde(default = "full_intensity")]
    pub blue: String,
}

fn full_intensity() -> String {
    "255".to_string()
}

impl Default for FilterFields {
    fn default() -> Self {
        Self {
            red: full_intensity(),
            green: full_intensity(),
            blue: full_intensity(),
        }
    }
}

impl FilterFields {
    pub fn get(&self, ch: Channel) -> &str {
        match ch {
            Channel::Red => &self.red,
            Channel::Green => &self.green,
            Channel::Blue => &self.blue,
        }
    }

    fn get_mut(&mut self, ch: Channel) -> &mut String {
        match ch {
            Channel::Red => &mut self.red,
            Channel::Green => &mut self.green,
            Channel::Blue => &mut self.blue,
        }
    }

    /// Normalized scales for the current text (alpha stays 1).
    pub fn scale(&self) -> ChannelScale {
        ChannelScale::rgb(
            normalize_channel_input(&self.red),
            normalize_channel_input(&self.green),
            normalize_channel_input(&self.blue),
        )
    }
}

/// Configuration for a single keyboard binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBindingConfig {
    /// A single character, e.g. "r" or "\t".
    pub key: String,
    pub action: KeyActionKind,
}

/// JSON config for the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlsConfig {
    #[serde(default = "default_keys")]
    pub keys: Vec<KeyBindingConfig>,
    /// Field text at startup and after `Reset`.
    #[serde(default)]
    pub initial: FilterFields,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            keys: default_keys(),
            initial: FilterFields::default(),
        }
    }
}

fn default_keys() -> Vec<KeyBindingConfig> {
    [
        ("r", KeyActionKind::FocusRed),
        ("g", KeyActionKind::FocusGreen),
        ("b", KeyActionKind::FocusBlue),
        ("\t", KeyActionKind::FocusNext),
        ("\u{8}", KeyActionKind::Backspace),
        ("\u{7f}", KeyActionKind::Backspace),
        ("c", KeyActionKind::Clear),
        ("x", KeyActionKind::Reset),
    ]
    .into_iter()
    .map(|(key, action)| KeyBindingConfig {
        key: key.to_string(),
        action,
    })
    .collect()
}

/// Actions exposed in the keymap JSON.
///
/// Digits and signs are never bound: they always edit the focused field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyActionKind {
    FocusRed,
    FocusGreen,
    FocusBlue,
    FocusNext,
    Backspace,
    /// Empty the focused field.
    Clear,
    /// Restore every field to its initial text.
    Reset,
}

/// The concrete action that mutates the fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcreteActionKind {
    Focus(Channel),
    FocusNext,
    Type(char),
    Backspace,
    Clear,
    Reset,
    SetField { channel: Channel, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteAction {
    pub kind: ConcreteActionKind,
}

impl From<ConcreteActionKind> for ConcreteAction {
    fn from(kind: ConcreteActionKind) -> Self {
        Self { kind }
    }
}

/// Keymap: maps a char to a concrete action.
#[derive(Debug, Default)]
pub struct Keymap {
    bindings: HashMap<char, KeyActionKind>,
}

impl Keymap {
    pub fn from_config(cfgs: &[KeyBindingConfig]) -> Self {
        let mut bindings = HashMap::new();
        for cfg in cfgs {
            let Some(ch) = cfg.key.chars().next() else {
                continue;
            };
            if is_field_char(ch) {
                tracing::warn!(key = ?ch, "ignoring binding: key edits the focused field");
                continue;
            }
            bindings.insert(ch, cfg.action);
        }
        Self { bindings }
    }

    pub fn lookup(&self, ch: char) -> Option<ConcreteAction> {
        if is_field_char(ch) {
            return Some(ConcreteActionKind::Type(ch).into());
        }
        let kind = self.bindings.get(&ch)?;
        Some(
            match kind {
                KeyActionKind::FocusRed => ConcreteActionKind::Focus(Channel::Red),
                KeyActionKind::FocusGreen => ConcreteActionKind::Focus(Channel::Green),
                KeyActionKind::FocusBlue => ConcreteActionKind::Focus(Channel::Blue),
                KeyActionKind::FocusNext => ConcreteActionKind::FocusNext,
                KeyActionKind::Backspace => ConcreteActionKind::Backspace,
                KeyActionKind::Clear => ConcreteActionKind::Clear,
                KeyActionKind::Reset => ConcreteActionKind::Reset,
            }
            .into(),
        )
    }
}

/// Characters a numeric input box accepts.
fn is_field_char(ch: char) -> bool {
    ch.is_ascii_digit() || ch == '-' || ch == '+'
}

/// Maps raw input into normalized channel scales and pushes them to a sink.
///
/// Every consumed key (and every OSC parameter) re-reads all three fields and triggers
/// exactly one `apply_channel_scale`; rapid input is not coalesced.
#[derive(Debug)]
pub struct FilterController {
    fields: FilterFields,
    initial: FilterFields,
    focus: Channel,
    keymap: Keymap,
}

impl Default for FilterController {
    fn default() -> Self {
        Self::from_config(&ControlsConfig::default())
    }
}

impl FilterController {
    pub fn from_config(cfg: &ControlsConfig) -> Self {
        Self {
            fields: cfg.initial.clone(),
            initial: cfg.initial.clone(),
            focus: Channel::Red,
            keymap: Keymap::from_config(&cfg.keys),
        }
    }

    pub fn fields(&self) -> &FilterFields {
        &self.fields
    }

    pub fn focus(&self) -> Channel {
        self.focus
    }

    pub fn scale(&self) -> ChannelScale {
        self.fields.scale()
    }

    /// Call this from your winit keyboard handler.
    ///
    /// Returns whether the key was consumed (and a redraw requested).
    pub fn on_key(
        &mut self,
        ch: char,
        sink: &mut impl ChannelScaleSink,
    ) -> Result<bool, EngineError> {
        let Some(act) = self.keymap.lookup(ch) else {
            return Ok(false);
        };
        self.apply(act);
        self.push(sink)?;
        Ok(true)
    }

    /// Set a field from a numeric parameter, e.g. an OSC `/filter/red 128`.
    ///
    /// Fractions are truncated as an input box would. Unknown names are ignored.
    pub fn on_param(
        &mut self,
        name: &str,
        value: f32,
        sink: &mut impl ChannelScaleSink,
    ) -> Result<bool, EngineError> {
        let Some(channel) = Channel::from_name(name) else {
            tracing::debug!(name, "ignoring unknown filter parameter");
            return Ok(false);
        };
        let text = if value.is_finite() {
            format!("{}", value.trunc() as i64)
        } else {
            String::new()
        };
        self.apply(ConcreteActionKind::SetField { channel, text }.into());
        self.push(sink)?;
        Ok(true)
    }

    /// Push the current scales without editing anything.
    pub fn push(&self, sink: &mut impl ChannelScaleSink) -> Result<(), EngineError> {
        sink.apply_channel_scale(self.scale())
    }

    fn apply(&mut self, act: ConcreteAction) {
        match act.kind {
            ConcreteActionKind::Focus(ch) => self.focus = ch,
            ConcreteActionKind::FocusNext => self.focus = self.focus.next(),
            ConcreteActionKind::Type(c) => self.fields.get_mut(self.focus).push(c),
            ConcreteActionKind::Backspace => {
                self.fields.get_mut(self.focus).pop();
            }
            ConcreteActionKind::Clear => self.fields.get_mut(self.focus).clear(),
            ConcreteActionKind::Reset => self.fields = self.initial.clone(),
            ConcreteActionKind::SetField { channel, text } => {
                *self.fields.get_mut(channel) = text;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chroma_runtime::RecordingSink;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn starts_at_full_intensity() {
        let c = FilterController::default();
        assert_eq!(c.fields().red, "255");
        assert!(c.scale().is_identity());
        assert_eq!(c.focus(), Channel::Red);
    }

    #[test]
    fn typing_edits_focused_field_and_pushes_each_time() {
        let mut c = FilterController::default();
        let mut sink = RecordingSink::default();

        // clear red, type 128
        assert!(c.on_key('c', &mut sink).expect("clear"));
        for ch in "128".chars() {
            c.on_key(ch, &mut sink).expect("digit");
        }
        assert_eq!(c.fields().red, "128");
        assert_eq!(sink.applied.len(), 4);

        let last = sink.applied.last().expect("pushed");
        assert!(approx(last.r, 128.0 / 255.0));
        assert!(approx(last.g, 1.0));
        assert!(approx(last.b, 1.0));
        // empty red after clear reads as 0
        assert!(approx(sink.applied[0].r, 0.0));
    }

    #[test]
    fn focus_keys_switch_fields() {
        let mut c = FilterController::default();
        let mut sink = RecordingSink::default();
        c.on_key('g', &mut sink).expect("focus");
        c.on_key('\u{8}', &mut sink).expect("backspace");
        assert_eq!(c.fields().green, "25");
        c.on_key('\t', &mut sink).expect("next");
        assert_eq!(c.focus(), Channel::Blue);
        c.on_key('\t', &mut sink).expect("wrap");
        assert_eq!(c.focus(), Channel::Red);
    }

    #[test]
    fn unbound_keys_are_not_consumed() {
        let mut c = FilterController::default();
        let mut sink = RecordingSink::default();
        assert!(!c.on_key('q', &mut sink).expect("ignored"));
        assert!(sink.applied.is_empty());
    }

    #[test]
    fn reset_restores_initial_fields() {
        let mut c = FilterController::default();
        let mut sink = RecordingSink::default();
        for ch in ['c', '7', 'b', 'c', 'x'] {
            c.on_key(ch, &mut sink).expect("key");
        }
        assert_eq!(c.fields(), &FilterFields::default());
        assert!(sink.applied.last().expect("pushed").is_identity());
    }

    #[test]
    fn param_sets_field_by_name() {
        let mut c = FilterController::default();
        let mut sink = RecordingSink::default();
        assert!(c.on_param("blue", 64.9, &mut sink).expect("param"));
        assert_eq!(c.fields().blue, "64");
        assert!(!c.on_param("alpha", 1.0, &mut sink).expect("unknown"));
        assert_eq!(sink.applied.len(), 1);
        assert!(approx(sink.applied[0].b, 64.0 / 255.0));
    }

    #[test]
    fn digits_cannot_be_rebound() {
        let cfg: ControlsConfig = serde_json::from_str(
            r#"{ "keys": [ { "key": "5", "action": "Reset" }, { "key": "z", "action": "Clear" } ] }"#,
        )
        .expect("config");
        let map = Keymap::from_config(&cfg.keys);
        assert_eq!(
            map.lookup('5'),
            Some(ConcreteActionKind::Type('5').into())
        );
        assert_eq!(map.lookup('z'), Some(ConcreteActionKind::Clear.into()));
        // bindings replace the defaults entirely
        assert_eq!(map.lookup('r'), None);
    }

    #[test]
    fn sink_errors_propagate() {
        struct Broken;
        impl ChannelScaleSink for Broken {
            fn apply_channel_scale(&mut self, _: ChannelScale) -> Result<(), EngineError> {
                Err(EngineError::NotReady {
                    op: "set_channel_scale",
                    state: "failed",
                })
            }
        }
        let mut c = FilterController::default();
        assert!(c.on_key('1', &mut Broken).is_err());
        // the edit itself still happened
        assert_eq!(c.fields().red, "2551");
    }
}
