//! TRELLIS Project
//!
//! Turns the projects a translator discovers into a validated, acyclic
//! project tree with framework libraries injected and a build order in which
//! every project follows its dependencies.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod node;
pub mod normalize;
pub mod policy;
pub mod preprocess;
pub mod translate;
pub mod tree;
pub mod validate;

pub use node::{NodeOrigin, ProjectNode, ProjectType, RawNode, RawTree, SpecVersion};
pub use normalize::{normalize, NormalizeError};
pub use policy::{LibraryPolicy, DEFAULT_CORE_LIBRARY};
pub use preprocess::{PreprocessError, PreprocessOptions, Preprocessor};
pub use translate::{StaticTranslator, TranslateError, Translator};
pub use tree::{CycleError, ProjectTree};
pub use validate::{ConfigValidator, FeatureGate, StructuralValidator, ValidationReport, Violation};
