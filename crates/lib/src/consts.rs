//! Well-known label keys, in-image paths and fixed values.

/// Label holding the builder's order as JSON.
pub const ORDER_LABEL: &str = "io.buildpacks.buildpack.order";

/// Label holding per-buildpack layer metadata, keyed by id then version.
pub const BUILDPACK_LAYERS_LABEL: &str = "io.buildpacks.buildpack.layers";

/// Label holding the builder description document.
pub const BUILDER_METADATA_LABEL: &str = "io.buildpacks.builder.metadata";

/// Label on a buildpack-package image naming its top-level buildpack.
pub const BUILDPACKAGE_METADATA_LABEL: &str = "io.buildpacks.buildpackage.metadata";

/// Stack identity label on build and run images.
pub const STACK_ID_LABEL: &str = "io.buildpacks.stack.id";

/// Mixin declaration label on build and run images (JSON array).
pub const MIXINS_LABEL: &str = "io.buildpacks.stack.mixins";

/// Lifecycle version label on a lifecycle image.
pub const LIFECYCLE_VERSION_LABEL: &str = "io.buildpacks.lifecycle.version";

/// Lifecycle API label on a lifecycle image (JSON).
pub const LIFECYCLE_APIS_LABEL: &str = "io.buildpacks.lifecycle.apis";

/// Environment variable carrying the CNB user id on a build image.
pub const CNB_USER_ID_ENV: &str = "CNB_USER_ID";

/// Environment variable carrying the CNB group id on a build image.
pub const CNB_GROUP_ID_ENV: &str = "CNB_GROUP_ID";

/// The only operating system builder images can be composed for.
pub const SUPPORTED_OS: &str = "linux";

/// Order document path inside the builder image (without leading slash).
pub const ORDER_TOML_PATH: &str = "cnb/order.toml";

/// Stack document path inside the builder image (without leading slash).
pub const STACK_TOML_PATH: &str = "cnb/stack.toml";

/// Directories every builder image provides, owned by the CNB user.
pub const DEFAULT_DIRECTORIES: &[&str] = &["cnb", "cnb/buildpacks", "layers", "workspace", "platform", "platform/env"];

/// Working directory of a composed builder image.
pub const BUILDER_WORKING_DIR: &str = "/layers";

/// Modification time stamped on every generated layer entry (1980-01-01T00:00:01Z).
pub const NORMALIZED_MTIME: u64 = 315_532_801;

/// Creation timestamp written into every generated image config.
pub const NORMALIZED_CREATED: &str = "1980-01-01T00:00:01Z";

/// File mode for generated regular files.
pub const FILE_MODE: u32 = 0o644;

/// File mode for generated directories.
pub const DIR_MODE: u32 = 0o755;

/// Name recorded in the builder metadata `createdBy` field.
pub const CREATED_BY_NAME: &str = "cnb-forge";

/// Version recorded in the builder metadata `createdBy` field.
pub const CREATED_BY_VERSION: &str = env!("CARGO_PKG_VERSION");
