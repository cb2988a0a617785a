//! Fallback policies for entries whose refresh failed terminally.
//!
//! During a migration a missing owner or group still has to map to
//! *something*; these policies decide what, and tag substituted values so
//! downstream reports can route them to manual review.

use std::fmt;
use std::sync::Arc;

/// Metadata tag on entries produced by a fallback policy.
pub const FALLBACK_TAG: &str = "_fallback";
/// Metadata tag on placeholder entries a human must review.
pub const MANUAL_REVIEW_TAG: &str = "_manualReviewRequired";

/// Factory building a placeholder value from the failing key.
pub type PlaceholderFactory<V> = Arc<dyn Fn(&str) -> V + Send + Sync>;

/// What to do when a refresh fails terminally.
pub enum FallbackPolicy<V> {
    /// Drop the entry and surface the miss to the caller.
    Skip,
    /// Substitute a designated administrative value. `None` degrades to
    /// [`Skip`](FallbackPolicy::Skip).
    AssignAdmin { admin: Option<V> },
    /// Build a placeholder from the key, flagged for manual review.
    CreatePlaceholder { factory: PlaceholderFactory<V> },
}

impl<V> FallbackPolicy<V> {
    pub fn kind(&self) -> FallbackKind {
        match self {
            FallbackPolicy::Skip => FallbackKind::Skip,
            FallbackPolicy::AssignAdmin { admin: Some(_) } => FallbackKind::AssignAdmin,
            // An absent admin behaves as Skip, and reports as such.
            FallbackPolicy::AssignAdmin { admin: None } => FallbackKind::Skip,
            FallbackPolicy::CreatePlaceholder { .. } => FallbackKind::Placeholder,
        }
    }
}

impl<V: Clone> Clone for FallbackPolicy<V> {
    fn clone(&self) -> Self {
        match self {
            FallbackPolicy::Skip => FallbackPolicy::Skip,
            FallbackPolicy::AssignAdmin { admin } => FallbackPolicy::AssignAdmin {
                admin: admin.clone(),
            },
            FallbackPolicy::CreatePlaceholder { factory } => FallbackPolicy::CreatePlaceholder {
                factory: Arc::clone(factory),
            },
        }
    }
}

impl<V> fmt::Debug for FallbackPolicy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackPolicy::Skip => f.write_str("FallbackPolicy::Skip"),
            FallbackPolicy::AssignAdmin { admin } => f
                .debug_struct("FallbackPolicy::AssignAdmin")
                .field("admin_present", &admin.is_some())
                .finish(),
            FallbackPolicy::CreatePlaceholder { .. } => {
                f.write_str("FallbackPolicy::CreatePlaceholder")
            }
        }
    }
}

/// Which fallback was applied, for lookup outcomes and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Skip,
    AssignAdmin,
    Placeholder,
}
