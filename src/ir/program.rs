//! Programs: an ordered list of functions (§3.4).

use crate::context::CompilerContext;
use crate::error::Location;
use crate::ir::function::Function;

/// A compilation unit: an ordered list of functions plus the context they
/// were built against (§3.4). The program borrows nothing from the
/// context; it merely agrees to use the same uniquer for every
/// `Handle<Type>`/`Handle<Attribute>` it stores.
#[derive(Debug, Clone)]
pub struct Program {
    pub context: CompilerContext,
    pub functions: Vec<Function>,
    pub loc: Location,
}

impl Program {
    pub fn new(context: CompilerContext) -> Self {
        Program {
            context,
            functions: Vec::new(),
            loc: Location::default(),
        }
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
