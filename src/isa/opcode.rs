//! IC10 opcode table.
//!
//! Every opcode carries its operand-kind vector, a branch/set condition
//! and a behaviour class. Passes reason about instructions through the
//! (behaviour, condition) pair instead of matching mnemonic strings:
//! for the condition-driven behaviours (jump, relative jump, jump-and-
//! link, set-register) there is at most one opcode per pair, so e.g.
//! the comparison-to-branch rewrite is `(SetRegister, c)` to
//! `(Jump, c)`.

/// Branch or set condition attached to an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    None,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Approx,
    NotApprox,
    DeviceSet,
    DeviceNotSet,
    EqualZero,
    NotEqualZero,
    GreaterZero,
    GreaterEqualZero,
    LessZero,
    LessEqualZero,
    ApproxZero,
    NotApproxZero,
}

impl Condition {
    /// The condition matching the opposite outcome.
    pub fn negate(self) -> Condition {
        use Condition::*;
        match self {
            None => None,
            Equal => NotEqual,
            NotEqual => Equal,
            Greater => LessEqual,
            GreaterEqual => Less,
            Less => GreaterEqual,
            LessEqual => Greater,
            Approx => NotApprox,
            NotApprox => Approx,
            DeviceSet => DeviceNotSet,
            DeviceNotSet => DeviceSet,
            EqualZero => NotEqualZero,
            NotEqualZero => EqualZero,
            GreaterZero => LessEqualZero,
            GreaterEqualZero => LessZero,
            LessZero => GreaterEqualZero,
            LessEqualZero => GreaterZero,
            ApproxZero => NotApproxZero,
            NotApproxZero => ApproxZero,
        }
    }
}

/// Structural classification of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behaviour {
    /// Absolute jump to a label (or through `ra`).
    Jump,
    /// Absolute jump that records the return address.
    JumpAndLink,
    /// Jump by a line offset.
    RelativeJump,
    /// Writes a condition result (or a plain move) into a register.
    SetRegister,
    Arithmetic,
    /// Assembler directives (alias, define).
    Meta,
    Stack,
    DeviceInterop,
    Timing,
    Other,
}

/// Expected operand shape, used for validation and pretty printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// A value register (aliases allowed).
    Register,
    /// A device pin (aliases allowed).
    Device,
    /// A register, number, alias or hash expression.
    Value,
    /// A bare identifier (logic type, label, alias name).
    Name,
}

macro_rules! opcode_table {
    ($($variant:ident $mnemonic:literal [$($kind:ident)*] $cond:ident $behaviour:ident;)*) => {
        /// An IC10 instruction mnemonic.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)*
        }

        /// Every opcode, in table order.
        pub const ALL_OPCODES: &[Opcode] = &[$(Opcode::$variant,)*];

        impl Opcode {
            pub fn mnemonic(self) -> &'static str {
                match self { $(Opcode::$variant => $mnemonic,)* }
            }

            pub fn operand_kinds(self) -> &'static [OperandKind] {
                match self { $(Opcode::$variant => &[$(OperandKind::$kind,)*],)* }
            }

            pub fn condition(self) -> Condition {
                match self { $(Opcode::$variant => Condition::$cond,)* }
            }

            pub fn behaviour(self) -> Behaviour {
                match self { $(Opcode::$variant => Behaviour::$behaviour,)* }
            }

            pub fn from_mnemonic(text: &str) -> Option<Opcode> {
                match text {
                    $($mnemonic => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcode_table! {
    // register moves and conditional sets
    Move  "move"  [Register Value] None SetRegister;
    Seq   "seq"   [Register Value Value] Equal SetRegister;
    Sne   "sne"   [Register Value Value] NotEqual SetRegister;
    Sgt   "sgt"   [Register Value Value] Greater SetRegister;
    Sge   "sge"   [Register Value Value] GreaterEqual SetRegister;
    Slt   "slt"   [Register Value Value] Less SetRegister;
    Sle   "sle"   [Register Value Value] LessEqual SetRegister;
    Sap   "sap"   [Register Value Value Value] Approx SetRegister;
    Sna   "sna"   [Register Value Value Value] NotApprox SetRegister;
    Seqz  "seqz"  [Register Value] EqualZero SetRegister;
    Snez  "snez"  [Register Value] NotEqualZero SetRegister;
    Sgtz  "sgtz"  [Register Value] GreaterZero SetRegister;
    Sgez  "sgez"  [Register Value] GreaterEqualZero SetRegister;
    Sltz  "sltz"  [Register Value] LessZero SetRegister;
    Slez  "slez"  [Register Value] LessEqualZero SetRegister;
    Sapz  "sapz"  [Register Value Value] ApproxZero SetRegister;
    Snaz  "snaz"  [Register Value Value] NotApproxZero SetRegister;
    Sdse  "sdse"  [Register Device] DeviceSet SetRegister;
    Sdns  "sdns"  [Register Device] DeviceNotSet SetRegister;

    // arithmetic
    Add   "add"   [Register Value Value] None Arithmetic;
    Sub   "sub"   [Register Value Value] None Arithmetic;
    Mul   "mul"   [Register Value Value] None Arithmetic;
    Div   "div"   [Register Value Value] None Arithmetic;
    Mod   "mod"   [Register Value Value] None Arithmetic;
    And   "and"   [Register Value Value] None Arithmetic;
    Or    "or"    [Register Value Value] None Arithmetic;
    Xor   "xor"   [Register Value Value] None Arithmetic;
    Nor   "nor"   [Register Value Value] None Arithmetic;
    Not   "not"   [Register Value] None Arithmetic;
    Sll   "sll"   [Register Value Value] None Arithmetic;
    Srl   "srl"   [Register Value Value] None Arithmetic;
    Sra   "sra"   [Register Value Value] None Arithmetic;
    Abs   "abs"   [Register Value] None Arithmetic;
    Sqrt  "sqrt"  [Register Value] None Arithmetic;
    Round "round" [Register Value] None Arithmetic;
    Trunc "trunc" [Register Value] None Arithmetic;
    Ceil  "ceil"  [Register Value] None Arithmetic;
    Floor "floor" [Register Value] None Arithmetic;
    Exp   "exp"   [Register Value] None Arithmetic;
    Log   "log"   [Register Value] None Arithmetic;
    Sin   "sin"   [Register Value] None Arithmetic;
    Cos   "cos"   [Register Value] None Arithmetic;
    Tan   "tan"   [Register Value] None Arithmetic;
    Asin  "asin"  [Register Value] None Arithmetic;
    Acos  "acos"  [Register Value] None Arithmetic;
    Atan  "atan"  [Register Value] None Arithmetic;
    Atan2 "atan2" [Register Value Value] None Arithmetic;
    Max   "max"   [Register Value Value] None Arithmetic;
    Min   "min"   [Register Value Value] None Arithmetic;
    Rand  "rand"  [Register] None Arithmetic;
    Select "select" [Register Value Value Value] None Arithmetic;

    // absolute jumps
    J     "j"     [Value] None Jump;
    Jal   "jal"   [Value] None JumpAndLink;
    Beq   "beq"   [Value Value Value] Equal Jump;
    Bne   "bne"   [Value Value Value] NotEqual Jump;
    Bgt   "bgt"   [Value Value Value] Greater Jump;
    Bge   "bge"   [Value Value Value] GreaterEqual Jump;
    Blt   "blt"   [Value Value Value] Less Jump;
    Ble   "ble"   [Value Value Value] LessEqual Jump;
    Bap   "bap"   [Value Value Value Value] Approx Jump;
    Bna   "bna"   [Value Value Value Value] NotApprox Jump;
    Beqz  "beqz"  [Value Value] EqualZero Jump;
    Bnez  "bnez"  [Value Value] NotEqualZero Jump;
    Bgtz  "bgtz"  [Value Value] GreaterZero Jump;
    Bgez  "bgez"  [Value Value] GreaterEqualZero Jump;
    Bltz  "bltz"  [Value Value] LessZero Jump;
    Blez  "blez"  [Value Value] LessEqualZero Jump;
    Bapz  "bapz"  [Value Value Value] ApproxZero Jump;
    Bnaz  "bnaz"  [Value Value Value] NotApproxZero Jump;
    Bdse  "bdse"  [Device Value] DeviceSet Jump;
    Bdns  "bdns"  [Device Value] DeviceNotSet Jump;

    // relative jumps
    Jr     "jr"     [Value] None RelativeJump;
    Breq   "breq"   [Value Value Value] Equal RelativeJump;
    Brne   "brne"   [Value Value Value] NotEqual RelativeJump;
    Brgt   "brgt"   [Value Value Value] Greater RelativeJump;
    Brge   "brge"   [Value Value Value] GreaterEqual RelativeJump;
    Brlt   "brlt"   [Value Value Value] Less RelativeJump;
    Brle   "brle"   [Value Value Value] LessEqual RelativeJump;
    Brap   "brap"   [Value Value Value Value] Approx RelativeJump;
    Brna   "brna"   [Value Value Value Value] NotApprox RelativeJump;
    Breqz  "breqz"  [Value Value] EqualZero RelativeJump;
    Brnez  "brnez"  [Value Value] NotEqualZero RelativeJump;
    Brgtz  "brgtz"  [Value Value] GreaterZero RelativeJump;
    Brgez  "brgez"  [Value Value] GreaterEqualZero RelativeJump;
    Brltz  "brltz"  [Value Value] LessZero RelativeJump;
    Brlez  "brlez"  [Value Value] LessEqualZero RelativeJump;
    Brapz  "brapz"  [Value Value Value] ApproxZero RelativeJump;
    Brnaz  "brnaz"  [Value Value Value] NotApproxZero RelativeJump;
    Brdse  "brdse"  [Device Value] DeviceSet RelativeJump;
    Brdns  "brdns"  [Device Value] DeviceNotSet RelativeJump;

    // device interop
    L     "l"     [Register Device Name] None DeviceInterop;
    S     "s"     [Device Name Value] None DeviceInterop;
    Lb    "lb"    [Register Value Name Name Value] None DeviceInterop;
    Sb    "sb"    [Value Name Value] None DeviceInterop;
    Ls    "ls"    [Register Device Value Name] None DeviceInterop;
    Ss    "ss"    [Device Value Name Value] None DeviceInterop;

    // call stack
    Push  "push"  [Value] None Stack;
    Pop   "pop"   [Register] None Stack;
    Peek  "peek"  [Register] None Stack;

    // timing
    Yield "yield" [] None Timing;
    Sleep "sleep" [Value] None Timing;
    Hcf   "hcf"   [] None Timing;

    // assembler directives
    Alias  "alias"  [Name Value] None Meta;
    Define "define" [Name Value] None Meta;
}

impl Opcode {
    pub fn arity(self) -> usize {
        self.operand_kinds().len()
    }

    /// Whether the (behaviour, condition) pair identifies this opcode.
    fn keyed_by_condition(self) -> bool {
        matches!(
            self.behaviour(),
            Behaviour::Jump | Behaviour::JumpAndLink | Behaviour::RelativeJump | Behaviour::SetRegister
        )
    }

    /// Look up the unique opcode for a condition-driven behaviour.
    pub fn for_behaviour(behaviour: Behaviour, condition: Condition) -> Option<Opcode> {
        ALL_OPCODES
            .iter()
            .copied()
            .find(|op| op.keyed_by_condition() && op.behaviour() == behaviour && op.condition() == condition)
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self.behaviour(),
            Behaviour::Jump | Behaviour::JumpAndLink | Behaviour::RelativeJump
        )
    }
}
