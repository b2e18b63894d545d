// Proguard mapping file: writer for the computed renaming and a parser for
// reading mappings back (inputs via --pg-map, and the round-trip the tests
// rely on).
//
// Format:
//   com.example.Foo -> a.a:
//       int count -> a
//       void run(int,java.lang.String) -> b

use std::collections::HashMap;
use std::io::Write;

use crate::error::CompileError;
use crate::graph::{descriptor_to_java, Application, NamingLens};

pub fn write_map(
    app: &Application,
    lens: &NamingLens,
    out: &mut impl Write,
) -> std::io::Result<()> {
    let factory = &app.factory;
    for class in app.program_classes_sorted() {
        let original = factory.java_name(class.ty);
        let renamed = descriptor_to_java(&lens.lookup_descriptor(factory, class.ty));
        writeln!(out, "{} -> {}:", original, renamed)?;
        let mut fields: Vec<_> = class.all_fields().collect();
        fields.sort_by(|a, b| factory.cmp_fields(a.field, b.field));
        for field in fields {
            let name = factory.string(factory.field_name(field.field));
            writeln!(
                out,
                "    {} {} -> {}",
                factory.java_name(factory.field_type(field.field)),
                name,
                name
            )?;
        }
        let mut methods: Vec<_> = class.all_methods().collect();
        methods.sort_by(|a, b| factory.cmp_methods(a.method, b.method));
        for method in methods {
            let proto = factory.method_proto(method.method);
            let params: Vec<String> = factory
                .proto_parameters(proto)
                .iter()
                .map(|&p| factory.java_name(p))
                .collect();
            writeln!(
                out,
                "    {} {}({}) -> {}",
                factory.java_name(factory.proto_return_type(proto)),
                factory.string(factory.method_name(method.method)),
                params.join(","),
                lens.lookup_method_name(factory, method.method)
            )?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct MappedMember {
    /// `void run(int)` for methods, `int count` for fields.
    pub signature: String,
    pub renamed: String,
}

#[derive(Debug, Clone, Default)]
pub struct MappedClass {
    pub renamed: String,
    pub members: Vec<MappedMember>,
}

/// A parsed mapping file, indexed by original class name with a reverse
/// index from renamed names.
#[derive(Debug, Default)]
pub struct ProguardMap {
    classes: HashMap<String, MappedClass>,
    renamed_to_original: HashMap<String, String>,
}

impl ProguardMap {
    pub fn parse(contents: &str) -> Result<ProguardMap, CompileError> {
        let mut map = ProguardMap::default();
        let mut current: Option<String> = None;
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let indented = line.starts_with(' ') || line.starts_with('\t');
            let line = line.trim();
            if indented {
                let Some(class) = current.as_ref() else {
                    return Err(CompileError::input(
                        format!("mapping line {}", number + 1),
                        "member mapping before any class mapping",
                    ));
                };
                let (signature, renamed) = split_arrow(line, number)?;
                map.classes
                    .get_mut(class)
                    .expect("current class exists")
                    .members
                    .push(MappedMember {
                        signature: signature.to_string(),
                        renamed: renamed.to_string(),
                    });
            } else {
                let line = line.strip_suffix(':').ok_or_else(|| {
                    CompileError::input(
                        format!("mapping line {}", number + 1),
                        "class mapping must end with ':'",
                    )
                })?;
                let (original, renamed) = split_arrow(line, number)?;
                map.renamed_to_original
                    .insert(renamed.to_string(), original.to_string());
                map.classes.insert(
                    original.to_string(),
                    MappedClass {
                        renamed: renamed.to_string(),
                        members: Vec::new(),
                    },
                );
                current = Some(original.to_string());
            }
        }
        Ok(map)
    }

    pub fn lookup(&self, original: &str) -> Option<&MappedClass> {
        self.classes.get(original)
    }

    pub fn original_for(&self, renamed: &str) -> Option<&str> {
        self.renamed_to_original.get(renamed).map(String::as_str)
    }

    pub fn classes(&self) -> impl Iterator<Item = (&String, &MappedClass)> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

fn split_arrow(line: &str, number: usize) -> Result<(&str, &str), CompileError> {
    line.split_once(" -> ")
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| {
            CompileError::input(
                format!("mapping line {}", number + 1),
                "expected `original -> renamed`",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_class_and_members() {
        let text = "\
com.example.Foo -> a.a:
    int count -> a
    void run(int) -> b
com.example.Bar -> a.b:
";
        let map = ProguardMap::parse(text).unwrap();
        assert_eq!(map.len(), 2);
        let foo = map.lookup("com.example.Foo").unwrap();
        assert_eq!(foo.renamed, "a.a");
        assert_eq!(foo.members.len(), 2);
        assert_eq!(foo.members[1].signature, "void run(int)");
        assert_eq!(foo.members[1].renamed, "b");
        assert_eq!(map.original_for("a.b"), Some("com.example.Bar"));
    }

    #[test]
    fn rejects_member_before_class() {
        let text = "    int x -> a\n";
        assert!(ProguardMap::parse(text).is_err());
    }

    #[test]
    fn rejects_missing_arrow() {
        assert!(ProguardMap::parse("com.example.Foo a.a:\n").is_err());
    }
}
