//! Error types for trellis-engine

use thiserror::Error;

/// Result type alias using the engine error type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the extension context and add-in engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Add-in id not present in the registry
    #[error("Unknown add-in: {id}")]
    UnknownAddin { id: String },

    /// Add-in exists but is disabled
    #[error("Add-in {id} is disabled")]
    AddinDisabled { id: String },

    /// A required dependency is missing or disabled
    #[error("Add-in {addin} requires {dependency}, which is missing or disabled")]
    MissingDependency { addin: String, dependency: String },

    /// A dependency's version does not satisfy the declared requirement
    #[error("Add-in {addin} requires {dependency} {required}, found {found}")]
    IncompatibleVersion {
        addin: String,
        dependency: String,
        required: String,
        found: String,
    },

    /// Dependency walk revisited an add-in on the current chain
    #[error("Cyclic dependency: {chain}")]
    CyclicDependency { chain: String },

    /// No node exists at the path
    #[error("Extension path not found: {path}")]
    ExtensionPathNotFound { path: String },

    /// A node at the path is not of the requested type
    #[error("Node {path} has type {found}, expected {expected}")]
    UnexpectedNodeType {
        path: String,
        expected: String,
        found: String,
    },

    /// The module loader failed
    #[error("Failed to load module {module} of add-in {addin}: {message}")]
    ModuleLoad {
        addin: String,
        module: String,
        message: String,
    },

    /// A type name could not be resolved in an add-in's modules
    #[error("Type {type_name} could not be resolved in add-in {addin}: {message}")]
    TypeResolution {
        addin: String,
        type_name: String,
        message: String,
    },

    /// An object factory produced a value of another type
    #[error("Object of type {type_name} is not a {expected}")]
    UnexpectedObjectType { type_name: String, expected: String },

    /// The context was closed
    #[error("Extension context has been closed")]
    ContextClosed,

    /// The engine was shut down or dropped
    #[error("Add-in engine is not running")]
    EngineShutdown,

    /// Registry or configuration error
    #[error(transparent)]
    Core(#[from] trellis_core::Error),
}

impl EngineError {
    /// Create a missing dependency error
    pub fn missing_dependency(addin: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::MissingDependency {
            addin: addin.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a path not found error
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::ExtensionPathNotFound { path: path.into() }
    }

    /// Create a type resolution error
    pub fn type_resolution(
        addin: impl Into<String>,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TypeResolution {
            addin: addin.into(),
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}
