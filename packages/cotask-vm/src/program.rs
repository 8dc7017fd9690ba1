/// One instruction. Jump targets and callees are resolved at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Push(i64),
    Pop,
    Dup,
    Add,
    Sub,
    Jump(usize),
    /// Pops the top value and jumps when it is zero.
    JumpZero(usize),
    Call(usize),
    Ret,
    Raise(String),
    Host(String),
    /// Reserves bytes against the memory budget until the call returns.
    Alloc(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Empty for the main chunk.
    pub name: String,
    pub code: Vec<Op>,
    /// Source line of each instruction.
    pub lines: Vec<usize>,
}

/// A compiled chunk. `functions[0]` is the main chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub chunk: String,
    pub functions: Vec<Function>,
}

impl Program {
    pub fn main(&self) -> &Function {
        &self.functions[0]
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }
}
