use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::value::{DataType, Value};

/// Arena index of a [`Section`]. Only valid for the model that created it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SectionId(u32);

impl SectionId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arena index of a [`Cell`]. Only valid for the model that created it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CellId(u32);

impl CellId {
    /// Construct from a raw arena index. Intended for tests and hosts that
    /// persist ids alongside a serialized model.
    #[must_use]
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Opaque host-side binding handle for an input or output cell.
///
/// The middle end never interprets the payload; it only distinguishes bound
/// from unbound cells.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Binding(pub String);

impl Binding {
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }
}

/// A band of the model that repeats a number of times unknown until runtime.
///
/// The root section does not repeat; every other section models a repeating
/// range of the source sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub parent: Option<SectionId>,
}

/// One cell of the computation model.
///
/// A cell holds at most one of a constant value or an expression. After
/// inlining, a cell may hold neither; such cells are skipped by code
/// generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub name: String,
    pub section: SectionId,
    pub constant: Option<Value>,
    pub expr: Option<Expr>,
    /// Assigned by type annotation; never read before it runs.
    pub data_type: Option<DataType>,
    /// Assigned by reference counting; zero until it runs.
    pub ref_count: u32,
    pub input: Option<Binding>,
    pub output: Option<Binding>,
}

impl Cell {
    pub fn is_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn is_output(&self) -> bool {
        self.output.is_some()
    }
}

/// Arena-owned tree of sections and cells, the unit the compiler pipeline
/// transforms.
///
/// Constant folding is representation-dependent, so hosts targeting several
/// numeric representations clone the model and transform each copy
/// independently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComputationModel {
    sections: Vec<Section>,
    cells: Vec<Cell>,
}

impl Default for ComputationModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputationModel {
    /// Creates a model containing only the root section.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sections: vec![Section {
                name: "_ROOT_".to_string(),
                parent: None,
            }],
            cells: Vec::new(),
        }
    }

    pub fn root(&self) -> SectionId {
        SectionId(0)
    }

    pub fn add_section(&mut self, parent: SectionId, name: impl Into<String>) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section {
            name: name.into(),
            parent: Some(parent),
        });
        id
    }

    pub fn add_cell(&mut self, section: SectionId, name: impl Into<String>) -> CellId {
        let id = CellId(self.cells.len() as u32);
        self.cells.push(Cell {
            name: name.into(),
            section,
            constant: None,
            expr: None,
            data_type: None,
            ref_count: 0,
            input: None,
            output: None,
        });
        id
    }

    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id.index()]
    }

    pub fn cell(&self, id: CellId) -> &Cell {
        &self.cells[id.index()]
    }

    pub fn cell_mut(&mut self, id: CellId) -> &mut Cell {
        &mut self.cells[id.index()]
    }

    /// Makes the cell an expression cell, dropping any constant.
    pub fn set_expression(&mut self, id: CellId, expr: Expr) {
        let cell = self.cell_mut(id);
        cell.constant = None;
        cell.expr = Some(expr);
    }

    /// Makes the cell a constant cell, dropping any expression.
    pub fn set_constant(&mut self, id: CellId, value: impl Into<Value>) {
        let cell = self.cell_mut(id);
        cell.expr = None;
        cell.constant = Some(value.into());
    }

    pub fn make_input(&mut self, id: CellId, binding: Binding) {
        self.cell_mut(id).input = Some(binding);
    }

    pub fn make_output(&mut self, id: CellId, binding: Binding) {
        self.cell_mut(id).output = Some(binding);
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> {
        (0..self.cells.len() as u32).map(CellId)
    }

    pub fn section_ids(&self) -> impl Iterator<Item = SectionId> {
        (0..self.sections.len() as u32).map(SectionId)
    }

    /// True when `inner` is `outer` or nested anywhere below it.
    pub fn section_is_within(&self, inner: SectionId, outer: SectionId) -> bool {
        let mut cursor = Some(inner);
        while let Some(s) = cursor {
            if s == outer {
                return true;
            }
            cursor = self.section(s).parent;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Expr, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_surface() {
        let mut model = ComputationModel::new();
        let root = model.root();
        let band = model.add_section(root, "Band");
        let a = model.add_cell(root, "A");
        let b = model.add_cell(band, "B");

        model.set_constant(a, 1.0);
        model.set_expression(b, Expr::cell(a));
        model.make_output(b, Binding::new("getB"));

        assert_eq!(model.cell(a).constant, Some(Value::Number(1.0)));
        assert!(model.cell(a).expr.is_none());
        assert!(model.cell(b).is_output());
        assert_eq!(model.section(band).parent, Some(root));
        assert!(model.section_is_within(band, root));
        assert!(!model.section_is_within(root, band));
    }

    #[test]
    fn set_expression_clears_constant() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        model.set_constant(a, 2.0);
        model.set_expression(a, Expr::number(3.0));
        assert!(model.cell(a).constant.is_none());
        assert!(model.cell(a).expr.is_some());
    }
}
