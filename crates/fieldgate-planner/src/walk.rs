//! Depth-first walk of one root field of a client operation.
//!
//! The walker owns traversal order and type resolution; compilers implement
//! [`Visitor`] and only react to enter/leave events. Fields owned by another
//! data source are not visited: they are returned as [`NestedField`]s so the
//! planner can compile them as separate fetches.

use fieldgate_core::ast::{Field, FieldDefinition, Operation, Schema, Selection};
use fieldgate_core::id::SourceIndex;

use crate::datasource::{FieldConfiguration, FieldConfigurations};
use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descend {
    Yes,
    No,
}

/// Read-only inputs shared by every event of one walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkContext<'a> {
    pub operation: &'a Operation,
    pub schema: &'a Schema,
    pub fields: &'a FieldConfigurations,
    /// The root field's enclosing type is not a root operation type.
    pub is_nested: bool,
}

/// A field being entered, with its resolved schema information.
#[derive(Debug, Clone, Copy)]
pub struct FieldVisit<'a> {
    pub field: &'a Field,
    pub enclosing_type: &'a str,
    pub definition: Option<&'a FieldDefinition>,
    pub config: Option<&'a FieldConfiguration>,
    /// Response path up to and including this field.
    pub path: &'a [String],
    pub is_root: bool,
}

pub trait Visitor {
    fn enter_operation(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        Ok(())
    }

    fn leave_operation(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        Ok(())
    }

    fn enter_selection_set(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        Ok(())
    }

    fn leave_selection_set(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        Ok(())
    }

    fn enter_field(
        &mut self,
        _cx: &WalkContext<'_>,
        _f: &FieldVisit<'_>,
    ) -> CompileResult<Descend> {
        Ok(Descend::Yes)
    }

    fn leave_field(&mut self, _cx: &WalkContext<'_>, _f: &FieldVisit<'_>) -> CompileResult<()> {
        Ok(())
    }

    fn enter_inline_fragment(
        &mut self,
        _cx: &WalkContext<'_>,
        _type_condition: &str,
    ) -> CompileResult<()> {
        Ok(())
    }

    fn leave_inline_fragment(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        Ok(())
    }

    /// A field in the current selection set that another data source resolves.
    fn foreign_field(&mut self, _cx: &WalkContext<'_>, _f: &FieldVisit<'_>) -> CompileResult<()> {
        Ok(())
    }
}

/// Who resolves a field reached during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Local,
    Foreign(SourceIndex),
    Unowned,
}

pub trait Boundary {
    fn classify(&self, type_name: &str, field_name: &str) -> Ownership;
}

/// A field handed off to another data source.
#[derive(Debug, Clone)]
pub struct NestedField<'a> {
    pub field: &'a Field,
    pub enclosing_type: String,
    pub path: Vec<String>,
    pub source: SourceIndex,
}

struct Walker<'a, 'b, V: ?Sized> {
    cx: WalkContext<'a>,
    visitor: &'b mut V,
    boundary: &'b dyn Boundary,
    nested: Vec<NestedField<'a>>,
}

/// Walk `root` (a field of `enclosing_type`) and report events to `visitor`.
pub fn walk_root_field<'a, V: Visitor + ?Sized>(
    cx: WalkContext<'a>,
    root: &'a Field,
    enclosing_type: &'a str,
    base_path: &[String],
    visitor: &mut V,
    boundary: &dyn Boundary,
) -> CompileResult<Vec<NestedField<'a>>> {
    let mut w = Walker {
        cx,
        visitor,
        boundary,
        nested: Vec::new(),
    };
    w.visitor.enter_operation(&w.cx)?;
    w.visitor.enter_selection_set(&w.cx)?;
    let mut path = base_path.to_vec();
    w.walk_field(root, enclosing_type, &mut path, true)?;
    w.visitor.leave_selection_set(&w.cx)?;
    w.visitor.leave_operation(&w.cx)?;
    Ok(w.nested)
}

impl<'a, 'b, V: Visitor + ?Sized> Walker<'a, 'b, V> {
    fn resolve(
        &self,
        field: &'a Field,
        enclosing_type: &'a str,
    ) -> CompileResult<(Option<&'a FieldDefinition>, Option<&'a FieldConfiguration>)> {
        let config = self.cx.fields.for_type_field(enclosing_type, &field.name);
        if field.name == "__typename" {
            return Ok((None, config));
        }
        match self.cx.schema.field(enclosing_type, &field.name) {
            Some(def) => Ok((Some(def), config)),
            None => Err(CompileError::UnknownField {
                type_name: enclosing_type.to_string(),
                field_name: field.name.clone(),
            }),
        }
    }

    fn walk_field(
        &mut self,
        field: &'a Field,
        enclosing_type: &'a str,
        path: &mut Vec<String>,
        is_root: bool,
    ) -> CompileResult<()> {
        let (definition, config) = self.resolve(field, enclosing_type)?;
        path.push(field.response_key().to_string());
        let visit = FieldVisit {
            field,
            enclosing_type,
            definition,
            config,
            path: &path[..],
            is_root,
        };

        let descend = self.visitor.enter_field(&self.cx, &visit)?;
        if descend == Descend::Yes {
            if let (Some(children), Some(def)) = (&field.selection_set, definition) {
                self.visitor.enter_selection_set(&self.cx)?;
                let mut child_path = path.clone();
                self.walk_selections(children, def.ty.base_name(), &mut child_path)?;
                self.visitor.leave_selection_set(&self.cx)?;
            }
        }
        self.visitor.leave_field(&self.cx, &visit)?;
        path.pop();
        Ok(())
    }

    fn walk_selections(
        &mut self,
        selections: &'a [Selection],
        enclosing_type: &'a str,
        path: &mut Vec<String>,
    ) -> CompileResult<()> {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    match self.boundary.classify(enclosing_type, &field.name) {
                        Ownership::Local => self.walk_field(field, enclosing_type, path, false)?,
                        Ownership::Foreign(source) => {
                            let (definition, config) = self.resolve(field, enclosing_type)?;
                            let mut nested_path = path.clone();
                            nested_path.push(field.response_key().to_string());
                            let visit = FieldVisit {
                                field,
                                enclosing_type,
                                definition,
                                config,
                                path: &nested_path,
                                is_root: false,
                            };
                            self.visitor.foreign_field(&self.cx, &visit)?;
                            self.nested.push(NestedField {
                                field,
                                enclosing_type: enclosing_type.to_string(),
                                path: nested_path,
                                source,
                            });
                        }
                        Ownership::Unowned => {
                            return Err(CompileError::UnownedField {
                                type_name: enclosing_type.to_string(),
                                field_name: field.name.clone(),
                            })
                        }
                    }
                }
                Selection::InlineFragment(fragment) => match &fragment.type_condition {
                    None => self.walk_selections(&fragment.selection_set, enclosing_type, path)?,
                    Some(condition) => {
                        self.visitor.enter_inline_fragment(&self.cx, condition)?;
                        self.visitor.enter_selection_set(&self.cx)?;
                        self.walk_selections(&fragment.selection_set, condition, path)?;
                        self.visitor.leave_selection_set(&self.cx)?;
                        self.visitor.leave_inline_fragment(&self.cx)?;
                    }
                },
            }
        }
        Ok(())
    }
}
