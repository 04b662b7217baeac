//! Functions: own the value/instruction arenas for their body (§3.4).

use crate::arena::{Arena, Handle};
use crate::attribute::Attribute;
use crate::error::{CompilationError, Location, Status};
use crate::ir::inst::Instruction;
use crate::ir::region::{Region, RegionKind};
use crate::ir::value::{Use, Value, ValueDef};
use crate::ty::Type;

/// A function: name, optional attribute dictionary (`subgroup_size`,
/// `work_group_size`, per-parameter dicts), and a body region whose
/// parameters are the function's parameters (§3.4).
///
/// Owns every value and instruction reachable from its body, across all
/// nesting depth of child regions — this is the "arena + side tables"
/// replacement for intrusive ownership described in `SPEC_FULL.md` §9.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub attrs: Option<Handle<Attribute>>,
    /// One attribute dictionary per body parameter, indexed by position
    /// (`fn.param_attr(arg_no)` in the source); consulted by
    /// `analysis::memref` for `alignment`/`shape_gcd`/`stride_gcd`.
    pub param_attrs: Vec<Option<Handle<Attribute>>>,
    pub body: Region,
    pub loc: Location,
    pub(crate) values: Arena<Value>,
    pub(crate) instructions: Arena<Instruction>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Function {
            name: name.into(),
            attrs: None,
            param_attrs: Vec::new(),
            body: Region::new(RegionKind::Collective),
            loc: Location::default(),
            values: Arena::new(),
            instructions: Arena::new(),
        }
    }

    pub fn param_attr(&self, index: usize) -> Option<Handle<Attribute>> {
        self.param_attrs.get(index).copied().flatten()
    }

    /// Swaps `self.body` out for the duration of `f`, so callers can hold
    /// `&mut Self` and `&mut Region` at once without a borrow conflict —
    /// the usual shape needed to push instructions into a function's own
    /// body region.
    pub fn with_body<R>(&mut self, f: impl FnOnce(&mut Self, &mut Region) -> R) -> R {
        let mut body = std::mem::take(&mut self.body);
        let result = f(self, &mut body);
        self.body = body;
        result
    }

    pub fn values(&self) -> &Arena<Value> {
        &self.values
    }

    pub fn instructions(&self) -> &Arena<Instruction> {
        &self.instructions
    }

    pub fn value(&self, handle: Handle<Value>) -> &Value {
        &self.values[handle]
    }

    pub fn inst(&self, handle: Handle<Instruction>) -> &Instruction {
        &self.instructions[handle]
    }

    /// Appends a body parameter of type `ty`, returning its value handle.
    pub fn add_param(&mut self, ty: Handle<Type>) -> Handle<Value> {
        let index = self.body.params.len() as u32;
        let handle = self.values.append(Value::new(
            ty,
            ValueDef::BlockParam {
                defining_inst: None,
                index,
            },
        ));
        self.body.params.push(handle);
        self.param_attrs.push(None);
        handle
    }

    /// Adds an instruction's result of type `ty`.
    fn add_result(&mut self, inst: Handle<Instruction>, index: u32, ty: Handle<Type>) -> Handle<Value> {
        self.values
            .append(Value::new(ty, ValueDef::InstResult { inst, index }))
    }

    /// Inserts `instruction` (with `result_types` determining its result
    /// values) at the end of `region`, recording a [`Use`] for every
    /// operand it reads and every `for`/`if`-child-region's iter-init.
    /// Returns the instruction handle and its result value handles, in
    /// declaration order.
    pub fn push(
        &mut self,
        region: &mut Region,
        instruction: Instruction,
        result_types: &[Handle<Type>],
    ) -> (Handle<Instruction>, Vec<Handle<Value>>) {
        let operands = instruction.operands();
        let inst_handle = self.instructions.append(instruction);

        let results: Vec<_> = result_types
            .iter()
            .enumerate()
            .map(|(i, ty)| self.add_result(inst_handle, i as u32, *ty))
            .collect();
        self.instructions[inst_handle].results = results.clone();

        for (operand_index, value) in operands.into_iter().enumerate() {
            self.values[value].uses.push(Use {
                inst: inst_handle,
                operand_index: operand_index as u32,
            });
        }

        region.push(inst_handle);
        (inst_handle, results)
    }

    /// Replaces every recorded use of `old` with `new`, splicing `old`'s
    /// use list onto `new` (§4.4's "only path that mutates def-use").
    /// Does not rewrite the operand inside `Op` itself — callers that
    /// need the graph and the operand payload consistent (most passes)
    /// should also patch the `Op` in place; this only maintains the
    /// value-side bookkeeping used for dominance/liveness queries.
    pub fn replace_all_uses(&mut self, old: Handle<Value>, new: Handle<Value>) {
        let moved = std::mem::take(&mut self.values[old].uses);
        self.values[new].uses.extend(moved);
    }

    /// Verifies `value` has no remaining uses before removing its
    /// defining instruction from `region`; mirrors the destructor
    /// assertion in §3.4/§4.4 ("no remaining uses").
    pub fn remove_instruction(
        &mut self,
        region: &mut Region,
        inst: Handle<Instruction>,
    ) -> Result<(), CompilationError> {
        for result in self.instructions[inst].results.clone() {
            if self.values[result].has_uses() {
                return Err(CompilationError::new(Status::IrValueStillHasUses));
            }
        }
        region.insts.retain(|h| *h != inst);
        Ok(())
    }
}
