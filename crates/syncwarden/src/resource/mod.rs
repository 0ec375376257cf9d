//! Resource data model: identities, documents and applications.

pub mod application;
pub mod key;
pub mod manifest;

pub use application::{
    AppKey, Application, ApplicationDestination, ApplicationSource, ApplicationSpec,
    AutomatedSyncPolicy, ObjectMeta, SyncPolicy, API_VERSION, APPLICATION_KIND,
};
pub use key::{group_of, is_cluster_scoped, KindKey, ResourceKey};
pub use manifest::Manifest;

/// Prefix of every annotation the controller interprets.
pub const ANNOTATION_PREFIX: &str = "syncwarden.io/";
pub const ANNOTATION_HOOK: &str = "syncwarden.io/hook";
pub const ANNOTATION_HOOK_DELETE_POLICY: &str = "syncwarden.io/hook-delete-policy";
pub const ANNOTATION_SYNC_WAVE: &str = "syncwarden.io/sync-wave";
pub const ANNOTATION_COMPARE_OPTIONS: &str = "syncwarden.io/compare-options";
pub const ANNOTATION_SYNC_OPTIONS: &str = "syncwarden.io/sync-options";

/// Compare option: an Extra resource carrying it never counts as drift.
pub const COMPARE_IGNORE_EXTRANEOUS: &str = "IgnoreExtraneous";

/// Sync option: the resource is never pruned.
pub const SYNC_OPTION_NO_PRUNE: &str = "Prune=false";

/// Default label linking live resources to their application.
pub const DEFAULT_TRACKING_LABEL: &str = "app.kubernetes.io/instance";
