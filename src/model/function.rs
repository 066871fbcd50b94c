use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::error::TransferError;
use crate::graph::{apply_binary, apply_unary, BinaryOp, EvalContext, UnaryOp, MX};

/// Shape of one function input/output slot. Every slot observed in practice
/// is a dense scalar, but the representation carries general shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotShape {
    pub rows: usize,
    pub cols: usize,
}

impl SlotShape {
    pub fn scalar() -> Self {
        Self { rows: 1, cols: 1 }
    }
}

impl fmt::Display for SlotShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-by-{} (dense)", self.rows, self.cols)
    }
}

pub type Register = usize;

/// One step of an extracted function body. Registers are work slots `@0…@n`;
/// a register may be overwritten once the value it held is dead.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Input {
        reg: Register,
        index: usize,
    },
    Constant {
        reg: Register,
        value: f64,
    },
    Unary {
        reg: Register,
        op: UnaryOp,
        arg: Register,
    },
    Binary {
        reg: Register,
        op: BinaryOp,
        lhs: Register,
        rhs: Register,
    },
    IfElseZero {
        reg: Register,
        cond: Register,
        value: Register,
    },
    /// A call to another extracted function. One entry per callee output
    /// slot; `None` marks an output that is unused at this call site and
    /// prints as `NULL`.
    Call {
        outputs: Vec<Option<Register>>,
        function: String,
        args: Vec<Register>,
    },
    Output {
        index: usize,
        reg: Register,
    },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Input { reg, index } => write!(f, "@{reg} = input[{index}]"),
            Instruction::Constant { reg, value } => {
                write!(f, "@{reg} = Const<{value}>(scalar)")
            }
            Instruction::Unary { reg, op, arg } => match op.function_name() {
                Some(name) => write!(f, "@{reg} = {name}(@{arg})"),
                None => match op {
                    UnaryOp::Neg => write!(f, "@{reg} = (-@{arg})"),
                    UnaryOp::Not => write!(f, "@{reg} = (!@{arg})"),
                    _ => unreachable!(),
                },
            },
            Instruction::Binary { reg, op, lhs, rhs } => match op.infix_symbol() {
                Some(symbol) => write!(f, "@{reg} = (@{lhs}{symbol}@{rhs})"),
                None => write!(
                    f,
                    "@{reg} = {}(@{lhs},@{rhs})",
                    op.function_name().unwrap()
                ),
            },
            Instruction::IfElseZero { reg, cond, value } => {
                write!(f, "@{reg} = (@{cond}?@{value}:0)")
            }
            Instruction::Call {
                outputs,
                function,
                args,
            } => {
                let args = args.iter().map(|a| format!("@{a}")).join(",");
                if outputs.len() == 1 {
                    match outputs[0] {
                        Some(reg) => {
                            write!(f, "@{reg} = function(\"{function}\").call([{args}])")
                        }
                        None => write!(f, "{{NULL}} = function(\"{function}\").call([{args}])"),
                    }
                } else {
                    let outs = outputs
                        .iter()
                        .map(|o| match o {
                            Some(reg) => format!("@{reg}"),
                            None => "NULL".to_string(),
                        })
                        .join(",");
                    write!(f, "{{{outs}}} = function(\"{function}\").call([{args}])")
                }
            }
            Instruction::Output { index, reg } => write!(f, "output[{index}] = @{reg}"),
        }
    }
}

/// A Modelica function extracted into a standalone callable over ordered,
/// flattened scalar inputs and outputs.
#[derive(Debug, Clone)]
pub struct ModelFunction {
    name: String,
    inputs: Vec<SlotShape>,
    outputs: Vec<SlotShape>,
    instructions: Vec<Instruction>,
}

impl ModelFunction {
    pub fn new(
        name: &str,
        inputs: Vec<SlotShape>,
        outputs: Vec<SlotShape>,
        instructions: Vec<Instruction>,
    ) -> Self {
        Self {
            name: name.to_string(),
            inputs,
            outputs,
            instructions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[SlotShape] {
        self.inputs.as_ref()
    }

    pub fn outputs(&self) -> &[SlotShape] {
        self.outputs.as_ref()
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn instructions(&self) -> &[Instruction] {
        self.instructions.as_ref()
    }

    pub fn register_count(&self) -> usize {
        let mut count = 0;
        for instruction in &self.instructions {
            let def = match instruction {
                Instruction::Input { reg, .. }
                | Instruction::Constant { reg, .. }
                | Instruction::Unary { reg, .. }
                | Instruction::Binary { reg, .. }
                | Instruction::IfElseZero { reg, .. } => Some(*reg),
                Instruction::Call { outputs, .. } => outputs.iter().flatten().max().copied(),
                Instruction::Output { .. } => None,
            };
            if let Some(reg) = def {
                count = count.max(reg + 1);
            }
        }
        count
    }

    /// Run the instruction list on numeric arguments. Nested calls are routed
    /// back through the context.
    pub fn evaluate(
        &self,
        args: &[f64],
        ctx: &mut dyn EvalContext,
    ) -> Result<Vec<f64>, TransferError> {
        if args.len() != self.inputs.len() {
            return Err(TransferError::FunctionExtraction {
                function: self.name.clone(),
                detail: format!(
                    "called with {} arguments, expected {}",
                    args.len(),
                    self.inputs.len()
                ),
            });
        }
        let mut regs = vec![0.0f64; self.register_count()];
        let mut outs = vec![None; self.outputs.len()];
        for instruction in &self.instructions {
            match instruction {
                Instruction::Input { reg, index } => regs[*reg] = args[*index],
                Instruction::Constant { reg, value } => regs[*reg] = *value,
                Instruction::Unary { reg, op, arg } => regs[*reg] = apply_unary(*op, regs[*arg]),
                Instruction::Binary { reg, op, lhs, rhs } => {
                    regs[*reg] = apply_binary(*op, regs[*lhs], regs[*rhs])
                }
                Instruction::IfElseZero { reg, cond, value } => {
                    regs[*reg] = if regs[*cond] != 0.0 {
                        regs[*value]
                    } else {
                        0.0
                    }
                }
                Instruction::Call {
                    outputs,
                    function,
                    args: call_args,
                } => {
                    let values: Vec<f64> = call_args.iter().map(|a| regs[*a]).collect();
                    for (index, out) in outputs.iter().enumerate() {
                        if let Some(reg) = out {
                            regs[*reg] = ctx.evaluate_call(function, &values, index)?;
                        }
                    }
                }
                Instruction::Output { index, reg } => outs[*index] = Some(regs[*reg]),
            }
        }
        outs.into_iter()
            .enumerate()
            .map(|(index, out)| {
                out.ok_or_else(|| TransferError::FunctionExtraction {
                    function: self.name.clone(),
                    detail: format!("output {index} is never assigned"),
                })
            })
            .collect()
    }

    /// Splice this function into a caller's graph: run the instruction list
    /// symbolically over the argument expressions, expanding nested calls
    /// through `functions`. Returns one expression per output slot.
    pub fn inline(
        &self,
        args: &[MX],
        functions: &IndexMap<String, ModelFunction>,
    ) -> Result<Vec<MX>, TransferError> {
        if args.len() != self.inputs.len() {
            return Err(TransferError::FunctionExtraction {
                function: self.name.clone(),
                detail: format!(
                    "called with {} arguments, expected {}",
                    args.len(),
                    self.inputs.len()
                ),
            });
        }
        let mut regs: Vec<Option<MX>> = vec![None; self.register_count()];
        let mut outs: Vec<Option<MX>> = vec![None; self.outputs.len()];
        let reg = |regs: &[Option<MX>], r: Register| -> MX {
            regs[r].clone().expect("register read before write")
        };
        for instruction in &self.instructions {
            match instruction {
                Instruction::Input { reg, index } => regs[*reg] = Some(args[*index].clone()),
                Instruction::Constant { reg, value } => regs[*reg] = Some(MX::constant(*value)),
                Instruction::Unary { reg: r, op, arg } => {
                    regs[*r] = Some(MX::unary(*op, &reg(&regs, *arg)))
                }
                Instruction::Binary {
                    reg: r,
                    op,
                    lhs,
                    rhs,
                } => regs[*r] = Some(MX::binary(*op, &reg(&regs, *lhs), &reg(&regs, *rhs))),
                Instruction::IfElseZero {
                    reg: r,
                    cond,
                    value,
                } => regs[*r] = Some(MX::if_else_zero(&reg(&regs, *cond), &reg(&regs, *value))),
                Instruction::Call {
                    outputs,
                    function,
                    args: call_args,
                } => {
                    let callee = functions.get(function).ok_or_else(|| {
                        TransferError::FunctionExtraction {
                            function: function.clone(),
                            detail: "is not extracted".to_string(),
                        }
                    })?;
                    let values: Vec<MX> = call_args.iter().map(|a| reg(&regs, *a)).collect();
                    let results = callee.inline(&values, functions)?;
                    for (index, out) in outputs.iter().enumerate() {
                        if let Some(r) = out {
                            regs[*r] = Some(results[index].clone());
                        }
                    }
                }
                Instruction::Output { index, reg: r } => outs[*index] = Some(reg(&regs, *r)),
            }
        }
        outs.into_iter()
            .enumerate()
            .map(|(index, out)| {
                out.ok_or_else(|| TransferError::FunctionExtraction {
                    function: self.name.clone(),
                    detail: format!("output {index} is never assigned"),
                })
            })
            .collect()
    }
}

fn write_slots(f: &mut fmt::Formatter, singular: &str, plural: &str, slots: &[SlotShape]) -> fmt::Result {
    if slots.len() == 1 {
        writeln!(f, " {singular}: {}", slots[0])
    } else {
        writeln!(f, " {plural} ({}):", slots.len())?;
        for (i, slot) in slots.iter().enumerate() {
            writeln!(f, "  {i}. {slot}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ModelFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "ModelFunction : function(\"{}\")", self.name)?;
        write_slots(f, "Input", "Inputs", &self.inputs)?;
        write_slots(f, "Output", "Outputs", &self.outputs)?;
        for instruction in &self.instructions {
            writeln!(f, "{instruction}")?;
        }
        Ok(())
    }
}
