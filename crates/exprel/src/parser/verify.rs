//! Static typing of property paths.
//!
//! With verification on, each path is walked segment by segment against the
//! declared variables, the known input types and the class library. Under
//! strict typing a root that resolves nowhere, or a member missing from a
//! known class, fails compilation. `Any` receivers are never an error.

use super::Compiler;
use crate::accessor::Segment;
use crate::builtins::class_of_type;
use crate::class::{resolve_overload, ClassDef};
use crate::error::{CompileError, CompileErrorKind};
use crate::lexer::Span;
use crate::types::Type;
use std::sync::Arc;

impl<'a> Compiler<'a> {
    pub(super) fn path_type(&self, segments: &[Segment], span: Span) -> Result<Type, CompileError> {
        if self.quiet > 0 || !self.options.verifies() {
            return Ok(Type::Any);
        }
        let mut ty = Type::Any;
        for segment in segments {
            ty = match segment {
                Segment::Root(name) => self.root_type(name, span.start)?,
                Segment::This => Type::Any,
                Segment::Base(node) => node.egress().clone(),
                Segment::Property { name, .. } => self.property_type(&ty, name, span.start)?,
                Segment::Index { .. } => Type::Any,
                Segment::Method { name, args, .. } => {
                    let types: Vec<Type> = args.iter().map(|a| a.egress().clone()).collect();
                    self.method_type(&ty, name, &types, span.start)?
                }
            };
        }
        Ok(ty)
    }

    /// Reports a name nothing declares: an error under strict typing.
    pub(super) fn untyped(&self, name: &str, at: usize, what: &str) -> Result<(), CompileError> {
        if self.quiet > 0 {
            return Ok(());
        }
        if self.options.strict_typing {
            return Err(self.err(
                CompileErrorKind::UnresolvedType,
                format!("{} '{}'", what, name),
                at,
            ));
        }
        if self.options.verify_types {
            tracing::debug!(name, offset = at, "{}, typed as Object", what);
        }
        Ok(())
    }

    fn root_type(&self, name: &str, at: usize) -> Result<Type, CompileError> {
        if let Some(declared) = self.declared(name) {
            return Ok(declared.ty.clone());
        }
        if let Some(ty) = self.options.known_input_types.get(name) {
            return Ok(ty.clone());
        }
        if let Some(value) = self.imports.get(name).or_else(|| self.options.imports.get(name)) {
            return Ok(value.type_of());
        }
        if let Some(class) = self.class_named(name) {
            return Ok(Type::Class(class.name_arc()));
        }
        self.untyped(name, at, "unresolved variable")?;
        Ok(Type::Any)
    }

    /// The class a receiver type exposes members through, with whether the
    /// members are its statics.
    fn receiver_class(&self, ty: &Type) -> Option<(Arc<ClassDef>, bool)> {
        match ty {
            Type::Object(name) => self.class_named(name).map(|c| (c, false)),
            Type::Class(name) => self.class_named(name).map(|c| (c, true)),
            other => class_of_type(other).map(|c| (c, false)),
        }
    }

    fn property_type(&self, receiver: &Type, name: &str, at: usize) -> Result<Type, CompileError> {
        match receiver {
            Type::Any | Type::Null | Type::Map => return Ok(Type::Any),
            Type::Array if name == "length" || name == "size" => return Ok(Type::Int),
            _ => {}
        }
        let Some((class, statics)) = self.receiver_class(receiver) else {
            return Ok(Type::Any);
        };
        let found = if statics {
            class.static_value(name).map(|v| v.type_of())
        } else {
            class
                .field(name)
                .map(|f| f.ty.clone())
                .or_else(|| class.getter(name).map(|g| g.returns.clone()))
        };
        match found {
            Some(ty) => Ok(ty),
            None => {
                self.untyped(&format!("{}.{}", class.name(), name), at, "unresolved member")?;
                Ok(Type::Any)
            }
        }
    }

    fn method_type(
        &self,
        receiver: &Type,
        name: &str,
        args: &[Type],
        at: usize,
    ) -> Result<Type, CompileError> {
        if matches!(receiver, Type::Any | Type::Null) {
            return Ok(Type::Any);
        }
        if matches!((name, args.len()), ("toString", 0)) {
            return Ok(Type::Str);
        }
        if matches!((name, args.len()), ("equals", 1)) {
            return Ok(Type::Bool);
        }
        let Some((class, statics)) = self.receiver_class(receiver) else {
            return Ok(Type::Any);
        };
        if let Some(resolved) = resolve_overload(class.methods_named(name, args.len(), statics), args) {
            return Ok(resolved.member.returns.clone());
        }
        if class.has_method(name) {
            // Exists with other argument types; dispatch decides at run time.
            return Ok(Type::Any);
        }
        self.untyped(&format!("{}.{}()", class.name(), name), at, "unresolved method")?;
        Ok(Type::Any)
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::NodeKind;
    use crate::class::{ClassDef, ClassLibrary};
    use crate::engine::CompileOptions;
    use crate::error::{CompileError, CompileErrorKind};
    use crate::types::Type;
    use crate::value::Value;

    fn person() -> std::sync::Arc<ClassDef> {
        ClassDef::builder("Person")
            .field("name", Type::Str)
            .field("age", Type::Int)
            .method("greet", vec![Type::Str], Type::Str, |this, args| {
                let name = this.as_object().and_then(|o| o.get_field("name")).unwrap_or_default();
                Ok(Value::from(format!("{} greets {}", name, args[0])))
            })
            .build()
    }

    fn compile(src: &str, options: &CompileOptions) -> Result<Type, CompileError> {
        let program = super::super::compile_program(src, options, &ClassLibrary::standard())?;
        match &program.kind {
            NodeKind::Block(block) => Ok(block
                .stmts
                .last()
                .map(|s| s.egress().clone())
                .unwrap_or(Type::Void)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_path_types() {
        let options = CompileOptions::new()
            .verify()
            .import_class(person())
            .input("p", Type::object("Person"));
        assert_eq!(compile("p.name", &options), Ok(Type::Str));
        assert_eq!(compile("p.name.length()", &options), Ok(Type::Int));
        assert_eq!(compile("p.greet('x')", &options), Ok(Type::Str));
        assert_eq!(compile("p.missing", &options), Ok(Type::Any));
        assert_eq!(compile("unknown.anything", &options), Ok(Type::Any));
    }

    #[test]
    fn test_strict_errors() {
        let options = CompileOptions::new()
            .strict()
            .import_class(person())
            .input("p", Type::object("Person"));
        assert_eq!(compile("p.age", &options), Ok(Type::Int));
        let err = compile("p.missing", &options).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnresolvedType);
        let err = compile("nobody.name", &options).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnresolvedType);
        let err = compile("new Nowhere()", &options).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnresolvedType);
        // Assigned names take the type of their first value.
        assert_eq!(compile("x = p; x.name", &options), Ok(Type::Str));
        assert_eq!(compile("int n = 1; n", &options), Ok(Type::Int));
    }
}
