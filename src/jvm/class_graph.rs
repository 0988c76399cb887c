//! Just enough of the class hierarchy to merge object types in stack map frames
//!
//! When two paths meet with different object types in the same slot, the frame needs a type both
//! are assignable to. Classes this graph knows nothing about are treated as direct subclasses of
//! `java/lang/Object`, which is always a correct (if imprecise) answer. Interfaces also merge to
//! `java/lang/Object`: the verifier treats interface types like `Object` anyway.

use crate::jvm::class_file::ClassFile;
use crate::jvm::{ClassAccessFlags, Error};
use std::collections::{HashMap, HashSet};

pub const OBJECT: &str = "java/lang/Object";

#[derive(Clone, Debug, PartialEq, Eq)]
struct ClassData {
    superclass: Option<String>,
    is_interface: bool,
}

/// Superclass edges between known classes
#[derive(Clone, Debug)]
pub struct ClassGraph {
    classes: HashMap<String, ClassData>,
}

impl ClassGraph {
    /// Graph with just `java/lang/Object`
    pub fn empty() -> ClassGraph {
        let mut classes = HashMap::new();
        classes.insert(
            String::from(OBJECT),
            ClassData {
                superclass: None,
                is_interface: false,
            },
        );
        ClassGraph { classes }
    }

    /// Graph with the commonly used classes of `java.lang` and `java.util`
    pub fn with_java_classes() -> ClassGraph {
        let mut graph = ClassGraph::empty();
        for (class, superclass) in JAVA_CLASSES {
            graph.add_class(class, Some(superclass), false);
        }
        for interface in JAVA_INTERFACES {
            graph.add_class(interface, Some(OBJECT), true);
        }
        graph
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn add_class(&mut self, class: &str, superclass: Option<&str>, is_interface: bool) {
        self.classes.insert(
            String::from(class),
            ClassData {
                superclass: superclass.map(String::from),
                is_interface,
            },
        );
    }

    /// Add the class declared by a class file
    pub fn add_class_file(&mut self, class: &ClassFile) -> Result<(), Error> {
        let name = class.class_name()?;
        let superclass = class.superclass_name()?;
        let is_interface = class.access_flags.contains(ClassAccessFlags::INTERFACE);
        self.add_class(name, superclass, is_interface);
        Ok(())
    }

    pub fn is_interface(&self, class: &str) -> bool {
        self.classes.get(class).map_or(false, |data| data.is_interface)
    }

    /// Superclass chain, starting from the class itself and ending at `java/lang/Object`
    fn ancestors<'a>(&'a self, class: &'a str) -> Vec<&'a str> {
        let mut chain = vec![class];
        let mut seen = HashSet::new();
        seen.insert(class);

        let mut current = class;
        while let Some(ClassData {
            superclass: Some(superclass),
            ..
        }) = self.classes.get(current)
        {
            if !seen.insert(superclass.as_str()) {
                break;
            }
            chain.push(superclass.as_str());
            current = superclass.as_str();
        }
        if current != OBJECT {
            chain.push(OBJECT);
        }
        chain
    }

    /// Is the first class a subclass of the second (or the same class)?
    pub fn is_subclass(&self, sub_class: &str, super_class: &str) -> bool {
        self.ancestors(sub_class).contains(&super_class)
    }

    /// Most specific class that both types (internal names or array descriptors) are
    /// assignable to
    pub fn common_superclass(&self, type1: &str, type2: &str) -> String {
        if type1 == type2 {
            return String::from(type1);
        }

        match (array_element(type1), array_element(type2)) {
            // Arrays of objects are covariant, arrays of primitives are only `Object`s
            (Some(elem1), Some(elem2)) if is_reference(elem1) && is_reference(elem2) => {
                let element = self.common_superclass(&class_of(elem1), &class_of(elem2));
                return array_of(&element);
            }
            (None, None) => (),
            _ => return String::from(OBJECT),
        }

        if self.is_interface(type1) || self.is_interface(type2) {
            return String::from(OBJECT);
        }
        let ancestors2 = self.ancestors(type2);
        self.ancestors(type1)
            .into_iter()
            .find(|ancestor| ancestors2.contains(ancestor))
            .map_or_else(|| String::from(OBJECT), String::from)
    }
}

impl Default for ClassGraph {
    fn default() -> ClassGraph {
        ClassGraph::with_java_classes()
    }
}

/// Element descriptor of an array descriptor
fn array_element(typ: &str) -> Option<&str> {
    typ.strip_prefix('[')
}

fn is_reference(descriptor: &str) -> bool {
    descriptor.starts_with('L') || descriptor.starts_with('[')
}

/// Class constant name for a reference descriptor (`Lfoo/Bar;` is `foo/Bar`, arrays stay as is)
fn class_of(descriptor: &str) -> String {
    match descriptor.strip_prefix('L').and_then(|d| d.strip_suffix(';')) {
        Some(class) => String::from(class),
        None => String::from(descriptor),
    }
}

/// Array class whose elements have the given class
pub fn array_of(class: &str) -> String {
    if class.starts_with('[') {
        format!("[{}", class)
    } else {
        format!("[L{};", class)
    }
}

/// `(class, superclass)`
const JAVA_CLASSES: [(&str, &str); 30] = [
    ("java/lang/String", OBJECT),
    ("java/lang/Class", OBJECT),
    ("java/lang/StringBuilder", "java/lang/AbstractStringBuilder"),
    ("java/lang/AbstractStringBuilder", OBJECT),
    ("java/lang/Number", OBJECT),
    ("java/lang/Integer", "java/lang/Number"),
    ("java/lang/Long", "java/lang/Number"),
    ("java/lang/Float", "java/lang/Number"),
    ("java/lang/Double", "java/lang/Number"),
    ("java/lang/Short", "java/lang/Number"),
    ("java/lang/Byte", "java/lang/Number"),
    ("java/lang/Boolean", OBJECT),
    ("java/lang/Character", OBJECT),
    ("java/lang/Throwable", OBJECT),
    ("java/lang/Error", "java/lang/Throwable"),
    ("java/lang/AssertionError", "java/lang/Error"),
    ("java/lang/Exception", "java/lang/Throwable"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/invoke/MethodHandle", OBJECT),
    ("java/lang/invoke/MethodType", OBJECT),
    ("java/lang/invoke/CallSite", OBJECT),
    ("java/lang/invoke/ConstantCallSite", "java/lang/invoke/CallSite"),
    ("java/util/AbstractCollection", OBJECT),
    ("java/util/AbstractList", "java/util/AbstractCollection"),
    ("java/util/ArrayList", "java/util/AbstractList"),
];

const JAVA_INTERFACES: [&str; 9] = [
    "java/lang/CharSequence",
    "java/lang/Comparable",
    "java/lang/Runnable",
    "java/lang/Iterable",
    "java/io/Serializable",
    "java/lang/Cloneable",
    "java/util/Collection",
    "java/util/List",
    "java/util/Map",
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_classes() {
        let graph = ClassGraph::with_java_classes();
        assert_eq!(
            graph.common_superclass("java/lang/Integer", "java/lang/Long"),
            "java/lang/Number"
        );
        assert_eq!(
            graph.common_superclass("java/lang/IllegalStateException", "java/lang/Error"),
            "java/lang/Throwable"
        );
        assert_eq!(
            graph.common_superclass("java/lang/String", "java/lang/String"),
            "java/lang/String"
        );
        assert!(graph.is_subclass("java/util/ArrayList", "java/util/AbstractCollection"));
        assert!(!graph.is_subclass("java/lang/Number", "java/lang/Integer"));
    }

    #[test]
    fn unknown_classes_and_interfaces() {
        let mut graph = ClassGraph::with_java_classes();
        assert_eq!(graph.common_superclass("me/Foo", "me/Bar"), OBJECT);
        assert_eq!(
            graph.common_superclass("java/lang/String", "java/lang/CharSequence"),
            OBJECT
        );

        graph.add_class("me/Base", None, false);
        graph.add_class("me/Foo", Some("me/Base"), false);
        graph.add_class("me/Bar", Some("me/Base"), false);
        assert_eq!(graph.common_superclass("me/Foo", "me/Bar"), "me/Base");
        assert_eq!(graph.common_superclass("me/Foo", "me/Base"), "me/Base");
    }

    #[test]
    fn arrays() {
        let graph = ClassGraph::with_java_classes();
        assert_eq!(
            graph.common_superclass("[Ljava/lang/Integer;", "[Ljava/lang/Long;"),
            "[Ljava/lang/Number;"
        );
        assert_eq!(graph.common_superclass("[I", "[J"), OBJECT);
        assert_eq!(graph.common_superclass("[I", "java/lang/String"), OBJECT);
        assert_eq!(
            graph.common_superclass("[[Ljava/lang/String;", "[[Ljava/lang/String;"),
            "[[Ljava/lang/String;"
        );
        assert_eq!(array_of("java/lang/String"), "[Ljava/lang/String;");
        assert_eq!(array_of("[I"), "[[I");
    }

    #[test]
    fn cycles_terminate() {
        let mut graph = ClassGraph::empty();
        graph.add_class("me/A", Some("me/B"), false);
        graph.add_class("me/B", Some("me/A"), false);
        assert_eq!(graph.common_superclass("me/A", "me/C"), OBJECT);
    }
}
