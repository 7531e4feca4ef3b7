use serde::{Deserialize, Serialize};

/// Sentinel for "no locked target" in [`InputSample::target`].
pub const NO_TARGET: i64 = -1;

bitflags::bitflags! {
    /// Held movement keys packed into one byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Keys: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const BOOST = 1 << 4;
    }
}

// On the wire the mask is a bare integer, not bitflags' named form.
impl Serialize for Keys {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for Keys {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(Keys::from_bits_truncate)
    }
}

/// One tick of client input as sent upstream to the authority.
///
/// Samples are self-describing: each one carries the complete control state,
/// so a lost sample is simply superseded by the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    pub keys: Keys,
    /// Facing angle in radians.
    pub angle: f32,
    pub fire: bool,
    /// Locked target entity, or [`NO_TARGET`].
    pub target: i64,
    /// Strictly increasing per client, starting at 1.
    #[serde(rename = "seq")]
    pub sequence: u32,
}

impl InputSample {
    pub fn new(sequence: u32, keys: Keys, angle: f32) -> Self {
        Self {
            keys,
            angle,
            fire: false,
            target: NO_TARGET,
            sequence,
        }
    }

    pub fn target(&self) -> Option<u32> {
        u32::try_from(self.target).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_bitmask() {
        let keys = Keys::UP | Keys::LEFT;
        assert_eq!(keys.bits(), 0b0101);
        assert!(keys.contains(Keys::UP));
        assert!(keys.contains(Keys::LEFT));
        assert!(!keys.contains(Keys::DOWN));
        assert!(Keys::empty().is_empty());
    }

    #[test]
    fn test_target_sentinel() {
        let mut sample = InputSample::new(1, Keys::UP, 0.0);
        assert_eq!(sample.target(), None);

        sample.target = 42;
        assert_eq!(sample.target(), Some(42));
    }

    #[test]
    fn test_input_json_shape() {
        let sample = InputSample::new(7, Keys::UP | Keys::RIGHT, 1.5);
        let json = serde_json::to_value(&sample).unwrap();

        assert_eq!(json["keys"], 9);
        assert_eq!(json["seq"], 7);
        assert_eq!(json["target"], -1);
        assert_eq!(json["fire"], false);
    }

    #[test]
    fn test_keys_unknown_bits_are_dropped() {
        let sample: InputSample =
            serde_json::from_str(r#"{"keys":255,"angle":0.0,"fire":false,"target":-1,"seq":1}"#)
                .unwrap();

        assert_eq!(sample.keys, Keys::all());
        assert_eq!(sample.keys.bits(), 0b1_1111);
    }
}
