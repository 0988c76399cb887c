use crate::jvm::class_graph::ClassGraph;
use crate::rewrite::ReservedNames;

pub struct Settings {
    /// Names of the placeholder runtime classes (and of the marker annotation)
    pub names: ReservedNames,

    /// Only rewrite classes carrying the marker annotation
    ///
    /// When this is off, every class is rewritten. That is what a class loader which rewrites
    /// everything it loads would do.
    pub require_marker: bool,

    /// What to do with classes in which some placeholder can't be rewritten
    pub failure_policy: FailurePolicy,

    /// Known superclasses, used to merge object types when recomputing stack map frames
    ///
    /// Classes missing from here are treated as direct subclasses of `java/lang/Object`. The
    /// command line tool adds every class it was given before rewriting any of them.
    pub classes: ClassGraph,
}

impl Settings {
    /// Settings for a placeholder runtime in the given package
    pub fn new(runtime_package: &str) -> Settings {
        Settings {
            names: ReservedNames::in_package(runtime_package),
            require_marker: true,
            failure_policy: FailurePolicy::Abort,
            classes: ClassGraph::with_java_classes(),
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new(ReservedNames::DEFAULT_PACKAGE)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Report the failure as an error
    Abort,

    /// Log the failure, then leave the class exactly as it was
    KeepOriginal,
}
