//! Instruction opcodes
//!
//! Control transfer (`goto`, `if-*`, `switch`, `return`, `throw`) is not an
//! opcode: it lives in the block [`Terminator`](crate::Terminator). Every
//! opcode here is a straight-line instruction.

use crate::types::RegKind;
use std::fmt;

macro_rules! opcodes {
    ($($variant:ident => $name:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            /// Every opcode, in declaration order
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// Mnemonic, e.g. `iget-wide`
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }
        }
    };
}

opcodes! {
    Nop => "nop",
    LoadParam => "load-param",
    LoadParamWide => "load-param-wide",
    LoadParamObject => "load-param-object",
    Move => "move",
    MoveWide => "move-wide",
    MoveObject => "move-object",
    MoveException => "move-exception",
    Const => "const",
    ConstWide => "const-wide",
    ConstString => "const-string",
    ConstClass => "const-class",
    MonitorEnter => "monitor-enter",
    MonitorExit => "monitor-exit",
    CheckCast => "check-cast",
    InstanceOf => "instance-of",
    ArrayLength => "array-length",
    NewInstance => "new-instance",
    NewArray => "new-array",
    FilledNewArray => "filled-new-array",
    FillArrayData => "fill-array-data",
    CmplFloat => "cmpl-float",
    CmpgFloat => "cmpg-float",
    CmplDouble => "cmpl-double",
    CmpgDouble => "cmpg-double",
    CmpLong => "cmp-long",
    AGet => "aget",
    AGetWide => "aget-wide",
    AGetObject => "aget-object",
    AGetBoolean => "aget-boolean",
    AGetByte => "aget-byte",
    AGetChar => "aget-char",
    AGetShort => "aget-short",
    APut => "aput",
    APutWide => "aput-wide",
    APutObject => "aput-object",
    APutBoolean => "aput-boolean",
    APutByte => "aput-byte",
    APutChar => "aput-char",
    APutShort => "aput-short",
    IGet => "iget",
    IGetWide => "iget-wide",
    IGetObject => "iget-object",
    IGetBoolean => "iget-boolean",
    IGetByte => "iget-byte",
    IGetChar => "iget-char",
    IGetShort => "iget-short",
    IPut => "iput",
    IPutWide => "iput-wide",
    IPutObject => "iput-object",
    IPutBoolean => "iput-boolean",
    IPutByte => "iput-byte",
    IPutChar => "iput-char",
    IPutShort => "iput-short",
    SGet => "sget",
    SGetWide => "sget-wide",
    SGetObject => "sget-object",
    SGetBoolean => "sget-boolean",
    SGetByte => "sget-byte",
    SGetChar => "sget-char",
    SGetShort => "sget-short",
    SPut => "sput",
    SPutWide => "sput-wide",
    SPutObject => "sput-object",
    SPutBoolean => "sput-boolean",
    SPutByte => "sput-byte",
    SPutChar => "sput-char",
    SPutShort => "sput-short",
    InvokeVirtual => "invoke-virtual",
    InvokeSuper => "invoke-super",
    InvokeDirect => "invoke-direct",
    InvokeStatic => "invoke-static",
    InvokeInterface => "invoke-interface",
    NegInt => "neg-int",
    NotInt => "not-int",
    NegLong => "neg-long",
    NotLong => "not-long",
    NegFloat => "neg-float",
    NegDouble => "neg-double",
    IntToLong => "int-to-long",
    IntToFloat => "int-to-float",
    IntToDouble => "int-to-double",
    LongToInt => "long-to-int",
    LongToFloat => "long-to-float",
    LongToDouble => "long-to-double",
    FloatToInt => "float-to-int",
    FloatToLong => "float-to-long",
    FloatToDouble => "float-to-double",
    DoubleToInt => "double-to-int",
    DoubleToLong => "double-to-long",
    DoubleToFloat => "double-to-float",
    IntToByte => "int-to-byte",
    IntToChar => "int-to-char",
    IntToShort => "int-to-short",
    AddInt => "add-int",
    SubInt => "sub-int",
    MulInt => "mul-int",
    DivInt => "div-int",
    RemInt => "rem-int",
    AndInt => "and-int",
    OrInt => "or-int",
    XorInt => "xor-int",
    ShlInt => "shl-int",
    ShrInt => "shr-int",
    UshrInt => "ushr-int",
    AddLong => "add-long",
    SubLong => "sub-long",
    MulLong => "mul-long",
    DivLong => "div-long",
    RemLong => "rem-long",
    AndLong => "and-long",
    OrLong => "or-long",
    XorLong => "xor-long",
    ShlLong => "shl-long",
    ShrLong => "shr-long",
    UshrLong => "ushr-long",
    AddFloat => "add-float",
    SubFloat => "sub-float",
    MulFloat => "mul-float",
    DivFloat => "div-float",
    RemFloat => "rem-float",
    AddDouble => "add-double",
    SubDouble => "sub-double",
    MulDouble => "mul-double",
    DivDouble => "div-double",
    RemDouble => "rem-double",
    AddIntLit => "add-int/lit",
    RsubIntLit => "rsub-int/lit",
    MulIntLit => "mul-int/lit",
    DivIntLit => "div-int/lit",
    RemIntLit => "rem-int/lit",
    AndIntLit => "and-int/lit",
    OrIntLit => "or-int/lit",
    XorIntLit => "xor-int/lit",
    ShlIntLit => "shl-int/lit",
    ShrIntLit => "shr-int/lit",
    UshrIntLit => "ushr-int/lit",
}

use Opcode::*;

impl Opcode {
    pub fn is_load_param(self) -> bool {
        matches!(self, LoadParam | LoadParamWide | LoadParamObject)
    }

    pub fn is_move(self) -> bool {
        matches!(self, Move | MoveWide | MoveObject)
    }

    pub fn is_const(self) -> bool {
        matches!(self, Const | ConstWide | ConstString | ConstClass)
    }

    pub fn is_aget(self) -> bool {
        matches!(
            self,
            AGet | AGetWide | AGetObject | AGetBoolean | AGetByte | AGetChar | AGetShort
        )
    }

    pub fn is_aput(self) -> bool {
        matches!(
            self,
            APut | APutWide | APutObject | APutBoolean | APutByte | APutChar | APutShort
        )
    }

    pub fn is_iget(self) -> bool {
        matches!(
            self,
            IGet | IGetWide | IGetObject | IGetBoolean | IGetByte | IGetChar | IGetShort
        )
    }

    pub fn is_iput(self) -> bool {
        matches!(
            self,
            IPut | IPutWide | IPutObject | IPutBoolean | IPutByte | IPutChar | IPutShort
        )
    }

    pub fn is_sget(self) -> bool {
        matches!(
            self,
            SGet | SGetWide | SGetObject | SGetBoolean | SGetByte | SGetChar | SGetShort
        )
    }

    pub fn is_sput(self) -> bool {
        matches!(
            self,
            SPut | SPutWide | SPutObject | SPutBoolean | SPutByte | SPutChar | SPutShort
        )
    }

    pub fn is_field_get(self) -> bool {
        self.is_iget() || self.is_sget()
    }

    pub fn is_field_put(self) -> bool {
        self.is_iput() || self.is_sput()
    }

    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            InvokeVirtual | InvokeSuper | InvokeDirect | InvokeStatic | InvokeInterface
        )
    }

    pub fn is_monitor(self) -> bool {
        matches!(self, MonitorEnter | MonitorExit)
    }

    pub fn is_cmp(self) -> bool {
        matches!(self, CmplFloat | CmpgFloat | CmplDouble | CmpgDouble | CmpLong)
    }

    pub fn is_unop(self) -> bool {
        (NegInt..=IntToShort).contains(&self)
    }

    pub fn is_binop(self) -> bool {
        (AddInt..=RemDouble).contains(&self)
    }

    pub fn is_binop_lit(self) -> bool {
        (AddIntLit..=UshrIntLit).contains(&self)
    }

    pub fn is_div_int_or_long(self) -> bool {
        matches!(
            self,
            DivInt | RemInt | DivLong | RemLong | DivIntLit | RemIntLit
        )
    }

    /// Operands may be swapped without changing the result
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            AddInt | MulInt | AndInt | OrInt | XorInt | AddLong | MulLong | AndLong | OrLong
                | XorLong
        )
    }

    /// The instruction may raise an exception
    pub fn may_throw(self) -> bool {
        self.is_aget()
            || self.is_aput()
            || self.is_iget()
            || self.is_iput()
            || self.is_sget()
            || self.is_sput()
            || self.is_invoke()
            || self.is_monitor()
            || self.is_div_int_or_long()
            || matches!(
                self,
                ConstClass
                    | CheckCast
                    | ArrayLength
                    | NewInstance
                    | NewArray
                    | FilledNewArray
                    | FillArrayData
            )
    }

    /// The get that reads back what this put stores
    pub fn put_to_get(self) -> Option<Opcode> {
        Some(match self {
            APut => AGet,
            APutWide => AGetWide,
            APutObject => AGetObject,
            APutBoolean => AGetBoolean,
            APutByte => AGetByte,
            APutChar => AGetChar,
            APutShort => AGetShort,
            IPut => IGet,
            IPutWide => IGetWide,
            IPutObject => IGetObject,
            IPutBoolean => IGetBoolean,
            IPutByte => IGetByte,
            IPutChar => IGetChar,
            IPutShort => IGetShort,
            SPut => SGet,
            SPutWide => SGetWide,
            SPutObject => SGetObject,
            SPutBoolean => SGetBoolean,
            SPutByte => SGetByte,
            SPutChar => SGetChar,
            SPutShort => SGetShort,
            _ => return None,
        })
    }

    /// Register class of the result, for opcodes whose result class does not
    /// depend on a method reference
    pub fn fixed_result_kind(self) -> Option<RegKind> {
        let kind = match self {
            LoadParamWide | MoveWide | ConstWide | AGetWide | IGetWide | SGetWide => RegKind::Wide,
            LoadParamObject | MoveObject | MoveException | ConstString | ConstClass
            | CheckCast | NewInstance | NewArray | FilledNewArray | AGetObject | IGetObject
            | SGetObject => RegKind::Object,
            NegLong | NotLong | NegDouble | IntToLong | IntToDouble | LongToDouble
            | FloatToLong | FloatToDouble | DoubleToLong => RegKind::Wide,
            AddLong | SubLong | MulLong | DivLong | RemLong | AndLong | OrLong | XorLong
            | ShlLong | ShrLong | UshrLong | AddDouble | SubDouble | MulDouble | DivDouble
            | RemDouble => RegKind::Wide,
            LoadParam | Move | Const | InstanceOf | ArrayLength => RegKind::Normal,
            _ if self.is_cmp() || self.is_unop() || self.is_binop() || self.is_binop_lit() => {
                RegKind::Normal
            },
            _ if self.is_aget() || self.is_iget() || self.is_sget() => RegKind::Normal,
            _ => return None,
        };
        Some(kind)
    }

    /// The move opcode that copies a value of the given register class
    pub fn move_for(kind: RegKind) -> Opcode {
        match kind {
            RegKind::Normal => Move,
            RegKind::Wide => MoveWide,
            RegKind::Object => MoveObject,
        }
    }

    /// The load-param opcode for a parameter of the given register class
    pub fn load_param_for(kind: RegKind) -> Opcode {
        match kind {
            RegKind::Normal => LoadParam,
            RegKind::Wide => LoadParamWide,
            RegKind::Object => LoadParamObject,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
