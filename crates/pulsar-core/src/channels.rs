// ── Channel selection ──

use std::collections::BTreeSet;
use std::fmt;

use crate::error::CoreError;

/// Highest channel id a Pulsar-M registrator exposes.
pub const MAX_CHANNEL_ID: u8 = 16;

/// Validated, deduplicated channel ids in ascending order.
///
/// The order is both the polling order and the positional mapping from
/// returned readings back to channel ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet(Vec<u8>);

impl ChannelSet {
    /// Build a set from configured ids. Duplicates collapse; zero,
    /// negative and ids above [`MAX_CHANNEL_ID`] are rejected.
    pub fn new<I>(raw: I) -> Result<Self, CoreError>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        let mut ids = BTreeSet::new();
        for value in raw {
            let value = value.into();
            let id = u8::try_from(value)
                .ok()
                .filter(|id| (1..=MAX_CHANNEL_ID).contains(id))
                .ok_or_else(|| CoreError::config(format!("invalid channel {value}")))?;
            ids.insert(id);
        }
        if ids.is_empty() {
            return Err(CoreError::config("channels_include is required"));
        }
        Ok(Self(ids.into_iter().collect()))
    }

    pub fn ids(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field name for a channel: `prefix` followed by the id.
    pub fn field_name(prefix: &str, id: u8) -> String {
        format!("{prefix}{id}")
    }
}

impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dedups_and_sorts() {
        let set = ChannelSet::new([3, 1, 3, 2]).unwrap();
        assert_eq!(set.ids(), &[1, 2, 3]);
        assert_eq!(set.to_string(), "1,2,3");
    }

    #[test]
    fn single_channel_repeated() {
        let set = ChannelSet::new([2, 2, 2]).unwrap();
        assert_eq!(set.ids(), &[2]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn accepts_bounds() {
        let set = ChannelSet::new([16, 1]).unwrap();
        assert_eq!(set.ids(), &[1, 16]);
    }

    #[test]
    fn rejects_out_of_range() {
        for raw in [vec![0], vec![-1], vec![17], vec![1, 2, 300, 3]] {
            let result = ChannelSet::new(raw.clone());
            assert!(
                matches!(result, Err(CoreError::Config { .. })),
                "{raw:?} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn rejects_empty() {
        let result = ChannelSet::new(Vec::<i64>::new());
        assert!(matches!(result, Err(CoreError::Config { .. })));
    }

    #[test]
    fn field_name_uses_prefix() {
        assert_eq!(ChannelSet::field_name("chan_", 3), "chan_3");
        assert_eq!(ChannelSet::field_name("", 12), "12");
    }
}
