//! Common types for bifrost: identity, wire models, descriptors, and errors

#![deny(missing_docs)]

pub mod cf;
pub mod error;
pub mod identity;
pub mod kube_utils;
pub mod opi;
pub mod telemetry;

pub use error::Error;
pub use identity::LrpIdentifier;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply issued by bifrost
pub const FIELD_MANAGER: &str = "bifrost";

/// Router key under which the control plane sends HTTP routes
pub const CF_ROUTER_KEY: &str = "cf-router";

// =============================================================================
// Labels
// =============================================================================

/// Label holding the workload GUID
pub const LABEL_GUID: &str = "cloudfoundry.org/guid";
/// Label holding the workload version
pub const LABEL_VERSION: &str = "cloudfoundry.org/version";
/// Label holding the owning app GUID
pub const LABEL_APP_GUID: &str = "cloudfoundry.org/app_guid";
/// Label holding the process type (web, worker, ...)
pub const LABEL_PROCESS_TYPE: &str = "cloudfoundry.org/process_type";
/// Label distinguishing apps from tasks
pub const LABEL_SOURCE_TYPE: &str = "cloudfoundry.org/source_type";

/// Source type value for long-running processes
pub const SOURCE_TYPE_APP: &str = "APP";
/// Source type value for tasks
pub const SOURCE_TYPE_TASK: &str = "TASK";

// =============================================================================
// Annotations
// =============================================================================

/// Annotation holding the external process GUID (`guid-version`)
pub const ANNOTATION_PROCESS_GUID: &str = "cloudfoundry.org/process_guid";
/// Annotation holding the control plane's last-updated marker
pub const ANNOTATION_LAST_UPDATED: &str = "cloudfoundry.org/last_updated";
/// Annotation holding the opaque router payload
pub const ANNOTATION_ROUTES: &str = "cloudfoundry.org/routes";
/// Annotation holding the app name
pub const ANNOTATION_APP_NAME: &str = "cloudfoundry.org/application_name";
/// Annotation holding the app GUID
pub const ANNOTATION_APP_ID: &str = "cloudfoundry.org/application_id";
/// Annotation holding the workload version
pub const ANNOTATION_VERSION: &str = "cloudfoundry.org/version";
/// Annotation holding the space name
pub const ANNOTATION_SPACE_NAME: &str = "cloudfoundry.org/space_name";
/// Annotation holding the space GUID
pub const ANNOTATION_SPACE_GUID: &str = "cloudfoundry.org/space_guid";
/// Annotation holding the org name
pub const ANNOTATION_ORG_NAME: &str = "cloudfoundry.org/org_name";
/// Annotation holding the org GUID
pub const ANNOTATION_ORG_GUID: &str = "cloudfoundry.org/org_guid";
/// Annotation holding the raw desire request as received
pub const ANNOTATION_ORIGINAL_REQUEST: &str = "cloudfoundry.org/original_request";
/// Annotation holding a task's completion callback URL
pub const ANNOTATION_COMPLETION_CALLBACK: &str = "cloudfoundry.org/completion_callback";
/// Annotation holding a task's human-readable name
pub const ANNOTATION_TASK_NAME: &str = "cloudfoundry.org/task_name";
/// Annotation naming the per-workload private registry secret
pub const ANNOTATION_REGISTRY_SECRET: &str = "cloudfoundry.org/private_registry_secret";
