//! Ordered fallback chain shared by catalog loading and source selection.
//!
//! `Primary → CatalogFallback → EmergencyFallback`. Each stage either
//! produces a result or asks for the next one; the last stage must always
//! produce.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStage {
    /// Configured data (catalog file, live snapshot).
    Primary,
    /// Fixed built-in catalog.
    CatalogFallback,
    /// Hardcoded list, no geometry involved.
    EmergencyFallback,
}

impl FallbackStage {
    pub fn next(self) -> Option<Self> {
        match self {
            FallbackStage::Primary => Some(FallbackStage::CatalogFallback),
            FallbackStage::CatalogFallback => Some(FallbackStage::EmergencyFallback),
            FallbackStage::EmergencyFallback => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FallbackStage::Primary => "primary",
            FallbackStage::CatalogFallback => "catalog_fallback",
            FallbackStage::EmergencyFallback => "emergency_fallback",
        }
    }
}

/// Outcome of one stage.
#[derive(Debug)]
pub enum Step<T> {
    Done(T),
    TryNext(String),
}

/// Run stages from `start` until one is `Done`. The closure is invoked with
/// the stage and must return `Done` for `EmergencyFallback`; if it does not,
/// `emergency` supplies the value.
pub fn run_chain<T>(
    start: FallbackStage,
    mut stage: impl FnMut(FallbackStage) -> Step<T>,
    emergency: impl FnOnce() -> T,
) -> (FallbackStage, T) {
    let mut current = Some(start);
    while let Some(s) = current {
        match stage(s) {
            Step::Done(v) => return (s, v),
            Step::TryNext(reason) => {
                tracing::warn!(target: "fallback", stage = s.as_str(), %reason, "stage gave up");
                current = s.next();
            }
        }
    }
    (FallbackStage::EmergencyFallback, emergency())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_first_done() {
        let mut seen = Vec::new();
        let (stage, v) = run_chain(
            FallbackStage::Primary,
            |s| {
                seen.push(s);
                match s {
                    FallbackStage::Primary => Step::TryNext("empty".into()),
                    _ => Step::Done(7),
                }
            },
            || 0,
        );
        assert_eq!(stage, FallbackStage::CatalogFallback);
        assert_eq!(v, 7);
        assert_eq!(seen, vec![FallbackStage::Primary, FallbackStage::CatalogFallback]);
    }

    #[test]
    fn emergency_supplies_value_when_every_stage_declines() {
        let (stage, v) = run_chain(FallbackStage::Primary, |_| Step::<u8>::TryNext("no".into()), || 42);
        assert_eq!(stage, FallbackStage::EmergencyFallback);
        assert_eq!(v, 42);
    }
}
