use crate::jvm::class_file::{
    AttributeLike, ClassFile, Code as CodeAttribute, ConstantsPool, Method, Serialize,
};
use crate::jvm::class_graph::ClassGraph;
use crate::jvm::code::{Code, MethodContext};
use crate::jvm::MethodAccessFlags;
use crate::rewrite::rewrite_instructions;
use crate::transform::{Error, FailurePolicy, Settings};
use std::borrow::Cow;

/// Outcome of transforming a class
#[derive(Debug, PartialEq, Eq)]
pub enum Transformed {
    /// The class should be left as is (it wasn't marked, or had nothing to rewrite)
    Unchanged,

    /// New contents of the class file
    Rewritten { bytes: Vec<u8>, rewrites: usize },
}

/// Rewrite the placeholders in every method of a class file
///
/// Only methods that actually contained placeholders get their `Code` attribute re-encoded, with
/// stack map frames recomputed if the class file version calls for them. Everything else about
/// the class is written back as it was read (constants only ever get appended to the pool).
pub fn transform_class(bytes: &[u8], settings: &Settings) -> Result<Transformed, Error> {
    match rewrite_class(bytes, settings) {
        Err(err) if settings.failure_policy == FailurePolicy::KeepOriginal => {
            log::warn!("Keeping class as is: {}", err);
            Ok(Transformed::Unchanged)
        }
        result => result,
    }
}

fn rewrite_class(bytes: &[u8], settings: &Settings) -> Result<Transformed, Error> {
    let mut class = ClassFile::parse(bytes)?;
    let class_name = String::from(class.class_name()?);

    if settings.require_marker && !class.has_annotation(&settings.names.marker_annotation)? {
        log::debug!("Skipping {} (not marked)", class_name);
        return Ok(Transformed::Unchanged);
    }

    // Frames need the superclass of this class, even if it wasn't registered up front
    let classes = if !class.version.requires_frames() {
        None
    } else if settings.classes.contains(&class_name) {
        Some(Cow::Borrowed(&settings.classes))
    } else {
        let mut classes = settings.classes.clone();
        classes.add_class_file(&class)?;
        Some(Cow::Owned(classes))
    };

    let mut rewrites = 0;
    for method in &mut class.methods {
        rewrites += rewrite_method(
            method,
            &mut class.constants,
            &class_name,
            classes.as_deref(),
            settings,
        )?;
    }

    if rewrites == 0 {
        log::debug!("Nothing to rewrite in {}", class_name);
        return Ok(Transformed::Unchanged);
    }

    class.sync_bootstrap_methods()?;
    let mut bytes = vec![];
    class
        .serialize(&mut bytes)
        .map_err(crate::jvm::Error::IoError)?;
    log::info!("Rewrote {} placeholder(s) in {}", rewrites, class_name);
    Ok(Transformed::Rewritten { bytes, rewrites })
}

/// Rewrite the body of one method, returning the number of placeholders rewritten
///
/// Frames are only recomputed when given the class graph to do it with.
fn rewrite_method(
    method: &mut Method,
    constants: &mut ConstantsPool,
    class_name: &str,
    classes: Option<&ClassGraph>,
    settings: &Settings,
) -> Result<usize, Error> {
    for attribute in &mut method.attributes {
        if attribute.name(constants)? != CodeAttribute::NAME {
            continue;
        }

        let code_attribute: CodeAttribute = attribute.parse()?;
        let mut code = Code::decode(&code_attribute, constants)?;
        let rewrites =
            rewrite_instructions(&mut code.instructions, &settings.names).map_err(|error| {
                let method_name = format!(
                    "{}{}",
                    constants.lookup_utf8(method.name_index).unwrap_or("<unknown>"),
                    constants
                        .lookup_utf8(method.descriptor_index)
                        .unwrap_or("<unknown>"),
                );
                Error::Rewrite {
                    class: String::from(class_name),
                    method: method_name,
                    error,
                }
            })?;

        if rewrites > 0 {
            let name = String::from(constants.lookup_utf8(method.name_index)?);
            let descriptor = String::from(constants.lookup_utf8(method.descriptor_index)?);
            log::debug!("Rewrote {} placeholder(s) in {}.{}", rewrites, class_name, name);
            if let Some(classes) = classes {
                let context = MethodContext {
                    class_name,
                    name: &name,
                    descriptor: &descriptor,
                    is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
                };
                code.compute_frames(&context, classes, constants)?;
            }
            let encoded = code.serialize_code(constants)?;
            *attribute = constants.get_attribute(encoded)?;
        }
        return Ok(rewrites);
    }

    // Abstract and native methods
    Ok(0)
}
