//! Decoded operator list for one page.
//!
//! A page's content is handed to the scanner as two parallel arrays, one of
//! opcodes and one of argument tuples, in paint order.

/// Opcodes the scanner reacts to. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Save,
    Restore,
    Transform,
    /// Path construction; the first argument carries the flat point list
    ConstructPath,
    Clip,
    ShadingFill,
    PaintImage,
    PaintInlineImage,
    PaintFormBegin,
    PaintFormEnd,
    /// Names an object the following operators depend on
    Dependency,
    Other,
}

/// A single operator argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Number(f64),
    Numbers(Vec<f64>),
    Name(String),
    /// An object reference that may or may not carry a name
    Object { name: Option<String> },
}

impl Operand {
    pub fn name(name: impl Into<String>) -> Self {
        Operand::Name(name.into())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// How an operator's first argument resolves to an object name
#[derive(Debug, Clone, PartialEq)]
pub enum NameArg<'a> {
    Named(&'a str),
    /// Argument absent or null
    Missing,
    /// Argument present but neither a name nor a named object
    Invalid,
}

impl<'a> NameArg<'a> {
    pub fn of(args: &'a [Operand]) -> Self {
        match args.first() {
            None | Some(Operand::Null) => NameArg::Missing,
            Some(Operand::Name(name)) => NameArg::Named(name),
            Some(Operand::Object { name: Some(name) }) => NameArg::Named(name),
            Some(_) => NameArg::Invalid,
        }
    }
}

/// Opcodes and their argument tuples as parallel arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorList {
    fn_array: Vec<OpCode>,
    args_array: Vec<Vec<Operand>>,
}

impl OperatorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: OpCode, args: Vec<Operand>) {
        self.fn_array.push(op);
        self.args_array.push(args);
    }

    /// Chainable `push` for building lists by hand
    pub fn with(mut self, op: OpCode, args: Vec<Operand>) -> Self {
        self.push(op, args);
        self
    }

    pub fn len(&self) -> usize {
        self.fn_array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fn_array.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OpCode, &[Operand])> + '_ {
        self.fn_array
            .iter()
            .copied()
            .zip(self.args_array.iter().map(Vec::as_slice))
    }
}
