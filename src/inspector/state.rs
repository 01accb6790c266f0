use std::fmt;

use crate::error::{Error, Result};

/// Lifecycle of one inspector invocation
///
/// `Idle -> Configuring -> Configured -> Building -> Complete`, with `Failed`
/// reachable from `Configuring` and `Building`. Builds may also start from
/// `Idle` against an already configured directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorState {
    Idle,
    Configuring,
    Configured { configuration_id: i64 },
    Building,
    Complete,
    Failed,
}

impl InspectorState {
    pub fn begin_configure(self) -> Result<Self> {
        match self {
            InspectorState::Idle => Ok(InspectorState::Configuring),
            from => Err(Error::InvalidTransition {
                from,
                to: "configure",
            }),
        }
    }

    /// Configuration id the build will reference, if any
    pub fn begin_build(self) -> Result<Option<i64>> {
        match self {
            InspectorState::Idle => Ok(None),
            InspectorState::Configured { configuration_id } => Ok(Some(configuration_id)),
            from => Err(Error::InvalidTransition { from, to: "build" }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InspectorState::Complete | InspectorState::Failed)
    }
}

impl fmt::Display for InspectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InspectorState::Idle => write!(f, "idle"),
            InspectorState::Configuring => write!(f, "configuring"),
            InspectorState::Configured { configuration_id } => {
                write!(f, "configured (#{})", configuration_id)
            }
            InspectorState::Building => write!(f, "building"),
            InspectorState::Complete => write!(f, "complete"),
            InspectorState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_only_from_idle() {
        assert_eq!(InspectorState::Idle.begin_configure().unwrap(), InspectorState::Configuring);
        for state in [
            InspectorState::Configuring,
            InspectorState::Configured { configuration_id: 1 },
            InspectorState::Building,
            InspectorState::Complete,
            InspectorState::Failed,
        ] {
            assert!(matches!(
                state.begin_configure(),
                Err(Error::InvalidTransition { to: "configure", .. })
            ));
        }
    }

    #[test]
    fn test_build_from_idle_or_configured() {
        assert_eq!(InspectorState::Idle.begin_build().unwrap(), None);
        assert_eq!(
            InspectorState::Configured { configuration_id: 7 }.begin_build().unwrap(),
            Some(7)
        );
        assert!(InspectorState::Failed.begin_build().is_err());
        assert!(InspectorState::Building.begin_build().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(InspectorState::Complete.is_terminal());
        assert!(InspectorState::Failed.is_terminal());
        assert!(!InspectorState::Idle.is_terminal());
    }
}
