use serde::{Deserialize, Serialize};

use crate::model::{CellId, SectionId};
use crate::value::{DataType, Value};

/// Binary and unary operators of the expression IR.
///
/// `Min`/`Max` are the binary extremum operators used by lowered MIN/MAX
/// folds (`_min_` / `_max_` in the rule language); they are not exposed by
/// spreadsheet syntax.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Concat,
    Plus,
    Minus,
    Times,
    Div,
    Exp,
    Percent,
    Neg,
    Min,
    Max,
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Operator {
    /// Source-syntax symbol, used by diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Concat => "&",
            Operator::Plus => "+",
            Operator::Minus | Operator::Neg => "-",
            Operator::Times => "*",
            Operator::Div => "/",
            Operator::Exp => "^",
            Operator::Percent => "%",
            Operator::Min => "_min_",
            Operator::Max => "_max_",
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Equal
                | Operator::NotEqual
                | Operator::Greater
                | Operator::GreaterOrEqual
                | Operator::Less
                | Operator::LessOrEqual
        )
    }
}

macro_rules! functions {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// High-level spreadsheet functions.
        ///
        /// Aggregators and closed-form financial functions are lowered away
        /// by the rewriter; the remainder are primitives for the code
        /// generator.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Function {
            $($variant),+
        }

        impl Function {
            /// Canonical spreadsheet name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Function::$variant => $name),+
                }
            }

            /// Case-insensitive lookup by spreadsheet name.
            pub fn from_name(name: &str) -> Option<Function> {
                let upper = name.to_ascii_uppercase();
                match upper.as_str() {
                    $($name => Some(Function::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

functions! {
    Abs => "ABS",
    Acos => "ACOS",
    Asin => "ASIN",
    Atan => "ATAN",
    Atan2 => "ATAN2",
    Ceiling => "CEILING",
    Cos => "COS",
    Degrees => "DEGREES",
    Even => "EVEN",
    Exp => "EXP",
    Fact => "FACT",
    Floor => "FLOOR",
    Int => "INT",
    Ln => "LN",
    Log => "LOG",
    Log10 => "LOG10",
    Mod => "MOD",
    Odd => "ODD",
    Pi => "PI",
    Power => "POWER",
    Radians => "RADIANS",
    Round => "ROUND",
    RoundDown => "ROUNDDOWN",
    RoundUp => "ROUNDUP",
    Sign => "SIGN",
    Sin => "SIN",
    Sqrt => "SQRT",
    Tan => "TAN",
    Trunc => "TRUNC",
    Combin => "COMBIN",
    Char => "CHAR",
    Clean => "CLEAN",
    Concatenate => "CONCATENATE",
    Dollar => "DOLLAR",
    Exact => "EXACT",
    Find => "FIND",
    Fixed => "FIXED",
    Left => "LEFT",
    Len => "LEN",
    Lower => "LOWER",
    Mid => "MID",
    Proper => "PROPER",
    Replace => "REPLACE",
    Rept => "REPT",
    Right => "RIGHT",
    Roman => "ROMAN",
    Search => "SEARCH",
    Substitute => "SUBSTITUTE",
    Text => "TEXT",
    Trim => "TRIM",
    Upper => "UPPER",
    Value => "VALUE",
    And => "AND",
    Or => "OR",
    Not => "NOT",
    If => "IF",
    True => "TRUE",
    False => "FALSE",
    IsNumber => "ISNUMBER",
    IsText => "ISTEXT",
    IsNonText => "ISNONTEXT",
    N => "N",
    T => "T",
    Choose => "CHOOSE",
    Index => "INDEX",
    Match => "MATCH",
    Lookup => "LOOKUP",
    HLookup => "HLOOKUP",
    VLookup => "VLOOKUP",
    Date => "DATE",
    Day => "DAY",
    Days360 => "DAYS360",
    Hour => "HOUR",
    Minute => "MINUTE",
    Month => "MONTH",
    Now => "NOW",
    Second => "SECOND",
    Time => "TIME",
    Today => "TODAY",
    Weekday => "WEEKDAY",
    Year => "YEAR",
    Sum => "SUM",
    Product => "PRODUCT",
    Min => "MIN",
    Max => "MAX",
    Count => "COUNT",
    CountA => "COUNTA",
    Average => "AVERAGE",
    Var => "VAR",
    VarP => "VARP",
    Stdev => "STDEV",
    StdevP => "STDEVP",
    SumSq => "SUMSQ",
    DevSq => "DEVSQ",
    GeoMean => "GEOMEAN",
    HarMean => "HARMEAN",
    Covar => "COVAR",
    Rank => "RANK",
    Npv => "NPV",
    Mirr => "MIRR",
    Irr => "IRR",
    Fv => "FV",
    Pv => "PV",
    Pmt => "PMT",
    Nper => "NPER",
    Rate => "RATE",
    Sln => "SLN",
    Syd => "SYD",
    Ddb => "DDB",
}

/// Sentinel for an array axis whose extent is unknown at compile time.
pub const DYNAMIC: i32 = -1;

/// Shape of an array expression, sheets x rows x columns.
///
/// At most one axis may be [`DYNAMIC`]; a dynamic array never constant-folds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayShape {
    pub sheets: i32,
    pub rows: i32,
    pub cols: i32,
}

impl ArrayShape {
    #[must_use]
    pub fn new(sheets: i32, rows: i32, cols: i32) -> Self {
        Self { sheets, rows, cols }
    }

    /// True when every axis extent is known.
    pub fn is_static(&self) -> bool {
        self.sheets != DYNAMIC && self.rows != DYNAMIC && self.cols != DYNAMIC
    }

    /// Total element count; `None` for dynamic shapes.
    pub fn len(&self) -> Option<usize> {
        if self.is_static() {
            Some(self.sheets as usize * self.rows as usize * self.cols as usize)
        } else {
            None
        }
    }
}

/// Direction of a section scope wrap relative to the cell that owns the
/// expression.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeDir {
    /// References climb out of the repeating section to a single outer cell.
    Outer,
    /// References fan out over every instance of the repeating section.
    Inner,
}

/// Which representable extreme an [`ExprKind::Extremum`] denotes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Smallest,
    Largest,
}

/// A fold template: accumulators with initializers, element bindings, step
/// expressions, and the optional merge / when-empty clauses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoldDef {
    /// Accumulator bindings, name paired with its initializer.
    pub accus: Vec<(String, Expr)>,
    /// Optional 1-based iteration index binding.
    pub index_name: Option<String>,
    /// Element bindings; more than one only for vector folds.
    pub elt_names: Vec<String>,
    /// Optional binding for the total element count, visible in `merge`.
    pub count_name: Option<String>,
    /// One step per accumulator, evaluated with accumulators and elements
    /// bound.
    pub steps: Vec<Expr>,
    /// Optional final expression combining the accumulators.
    pub merge: Option<Expr>,
    /// Optional result for an empty element list.
    pub when_empty: Option<Expr>,
    /// Elements may be processed in any order.
    pub may_rearrange: bool,
    /// Chunks may be folded independently and merged.
    pub may_reduce: bool,
}

/// Element source of an [`ExprKind::ApplyFold`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldSource {
    /// Flat list of scalar element expressions.
    List(Vec<Expr>),
    /// Parallel vectors, one per element binding of the fold.
    Vectors(Vec<Expr>),
}

/// One integer-keyed branch of a [`ExprKind::Switch`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub key: i64,
    pub value: Expr,
}

/// Expression node kinds. See [`Expr`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExprKind {
    /// Literal constant.
    Const(Value),
    /// Non-owning reference to another cell of the same model.
    CellRef(CellId),
    /// Operator application.
    Op { op: Operator, args: Vec<Expr> },
    /// Spreadsheet function call.
    Call { function: Function, args: Vec<Expr> },
    /// Array literal with an explicit shape.
    ArrayRef { shape: ArrayShape, elems: Vec<Expr> },
    /// Reference to a lexically enclosing fold or rule binding.
    LetVar(String),
    /// Fold template.
    FoldDef(Box<FoldDef>),
    /// Application of a fold to an element source.
    ApplyFold { def: Box<Expr>, over: FoldSource },
    /// Integer-selector multiway branch with a default.
    Switch {
        selector: Box<Expr>,
        cases: Vec<SwitchCase>,
        default: Box<Expr>,
    },
    /// Section scope boundary marker around the wrapped arguments.
    SectionWrap {
        dir: ScopeDir,
        section: SectionId,
        args: Vec<Expr>,
    },
    /// Transient rewrite-time splice of several expressions into an
    /// enclosing argument list; never survives the rewrite pass.
    Splice(Vec<Expr>),
    /// Explicit error placeholder, e.g. the out-of-range branch of a
    /// lowered CHOOSE. Ignored by type unification.
    Error(String),
    /// Smallest or largest representable value of the active numeric
    /// representation; seed of MIN/MAX folds.
    Extremum(Bound),
}

/// An expression tree node with a lazily assigned data type.
///
/// Expressions are trees, never DAGs; `Clone` is a deep structural copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    /// Assigned by type annotation; `None` until then.
    pub ty: Option<DataType>,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind) -> Self {
        Self { kind, ty: None }
    }

    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::new(ExprKind::Const(value.into()))
    }

    #[must_use]
    pub fn number(value: f64) -> Self {
        Self::constant(value)
    }

    #[must_use]
    pub fn cell(id: CellId) -> Self {
        Self::new(ExprKind::CellRef(id))
    }

    #[must_use]
    pub fn op(op: Operator, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Op { op, args })
    }

    #[must_use]
    pub fn call(function: Function, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call { function, args })
    }

    #[must_use]
    pub fn array(shape: ArrayShape, elems: Vec<Expr>) -> Self {
        Self::new(ExprKind::ArrayRef { shape, elems })
    }

    #[must_use]
    pub fn let_var(name: impl Into<String>) -> Self {
        Self::new(ExprKind::LetVar(name.into()))
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ExprKind::Error(message.into()))
    }

    #[must_use]
    pub fn wrap(dir: ScopeDir, section: SectionId, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::SectionWrap { dir, section, args })
    }

    /// The constant value, if this node is a literal.
    pub fn as_const(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Visits every direct child, left to right.
    pub fn for_each_child(&self, f: &mut impl FnMut(&Expr)) {
        match &self.kind {
            ExprKind::Const(_)
            | ExprKind::CellRef(_)
            | ExprKind::LetVar(_)
            | ExprKind::Error(_)
            | ExprKind::Extremum(_) => {}
            ExprKind::Op { args, .. }
            | ExprKind::Call { args, .. }
            | ExprKind::ArrayRef { elems: args, .. }
            | ExprKind::SectionWrap { args, .. }
            | ExprKind::Splice(args) => {
                for a in args {
                    f(a);
                }
            }
            ExprKind::FoldDef(def) => {
                for (_, init) in &def.accus {
                    f(init);
                }
                for step in &def.steps {
                    f(step);
                }
                if let Some(m) = &def.merge {
                    f(m);
                }
                if let Some(e) = &def.when_empty {
                    f(e);
                }
            }
            ExprKind::ApplyFold { def, over } => {
                f(def);
                match over {
                    FoldSource::List(elems) | FoldSource::Vectors(elems) => {
                        for e in elems {
                            f(e);
                        }
                    }
                }
            }
            ExprKind::Switch {
                selector,
                cases,
                default,
            } => {
                f(selector);
                for c in cases {
                    f(&c.value);
                }
                f(default);
            }
        }
    }

    /// Mutable variant of [`Expr::for_each_child`].
    pub fn for_each_child_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match &mut self.kind {
            ExprKind::Const(_)
            | ExprKind::CellRef(_)
            | ExprKind::LetVar(_)
            | ExprKind::Error(_)
            | ExprKind::Extremum(_) => {}
            ExprKind::Op { args, .. }
            | ExprKind::Call { args, .. }
            | ExprKind::ArrayRef { elems: args, .. }
            | ExprKind::SectionWrap { args, .. }
            | ExprKind::Splice(args) => {
                for a in args {
                    f(a);
                }
            }
            ExprKind::FoldDef(def) => {
                for (_, init) in &mut def.accus {
                    f(init);
                }
                for step in &mut def.steps {
                    f(step);
                }
                if let Some(m) = &mut def.merge {
                    f(m);
                }
                if let Some(e) = &mut def.when_empty {
                    f(e);
                }
            }
            ExprKind::ApplyFold { def, over } => {
                f(def);
                match over {
                    FoldSource::List(elems) | FoldSource::Vectors(elems) => {
                        for e in elems {
                            f(e);
                        }
                    }
                }
            }
            ExprKind::Switch {
                selector,
                cases,
                default,
            } => {
                f(selector);
                for c in cases {
                    f(&mut c.value);
                }
                f(default);
            }
        }
    }

    /// Pre-order walk over this node and every descendant.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        self.for_each_child(&mut |child| child.visit(f));
    }

    /// Appends every cell referenced anywhere in this tree.
    pub fn collect_cell_refs(&self, out: &mut Vec<CellId>) {
        self.visit(&mut |node| {
            if let ExprKind::CellRef(id) = node.kind {
                out.push(id);
            }
        });
    }
}
