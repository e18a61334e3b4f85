use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// The EVM instruction set, keyed by its byte encoding.
///
/// Mnemonics parse the way debugger endpoints print them, including the
/// older and newer spellings of renamed instructions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    EnumString,
    Display,
    IntoStaticStr,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
pub enum Opcode {
    // Arithmetic
    STOP = 0x00,
    ADD = 0x01,
    MUL = 0x02,
    SUB = 0x03,
    DIV = 0x04,
    SDIV = 0x05,
    MOD = 0x06,
    SMOD = 0x07,
    ADDMOD = 0x08,
    MULMOD = 0x09,
    EXP = 0x0a,
    SIGNEXTEND = 0x0b,

    // Comparison and bitwise logic
    LT = 0x10,
    GT = 0x11,
    SLT = 0x12,
    SGT = 0x13,
    EQ = 0x14,
    ISZERO = 0x15,
    AND = 0x16,
    OR = 0x17,
    XOR = 0x18,
    NOT = 0x19,
    BYTE = 0x1a,
    SHL = 0x1b,
    SHR = 0x1c,
    SAR = 0x1d,

    // Hashing
    #[strum(to_string = "SHA3", serialize = "KECCAK256")]
    SHA3 = 0x20,

    // Environment
    ADDRESS = 0x30,
    BALANCE = 0x31,
    ORIGIN = 0x32,
    CALLER = 0x33,
    CALLVALUE = 0x34,
    CALLDATALOAD = 0x35,
    CALLDATASIZE = 0x36,
    CALLDATACOPY = 0x37,
    CODESIZE = 0x38,
    CODECOPY = 0x39,
    GASPRICE = 0x3a,
    EXTCODESIZE = 0x3b,
    EXTCODECOPY = 0x3c,
    RETURNDATASIZE = 0x3d,
    RETURNDATACOPY = 0x3e,
    EXTCODEHASH = 0x3f,

    // Block information
    BLOCKHASH = 0x40,
    COINBASE = 0x41,
    TIMESTAMP = 0x42,
    NUMBER = 0x43,
    #[strum(to_string = "DIFFICULTY", serialize = "PREVRANDAO")]
    DIFFICULTY = 0x44,
    GASLIMIT = 0x45,
    CHAINID = 0x46,
    SELFBALANCE = 0x47,
    BASEFEE = 0x48,
    BLOBHASH = 0x49,
    BLOBBASEFEE = 0x4a,

    // Stack, memory, storage and flow
    POP = 0x50,
    MLOAD = 0x51,
    MSTORE = 0x52,
    MSTORE8 = 0x53,
    SLOAD = 0x54,
    SSTORE = 0x55,
    JUMP = 0x56,
    JUMPI = 0x57,
    PC = 0x58,
    MSIZE = 0x59,
    GAS = 0x5a,
    JUMPDEST = 0x5b,
    TLOAD = 0x5c,
    TSTORE = 0x5d,
    MCOPY = 0x5e,

    // Push
    PUSH0 = 0x5f,
    PUSH1 = 0x60,
    PUSH2 = 0x61,
    PUSH3 = 0x62,
    PUSH4 = 0x63,
    PUSH5 = 0x64,
    PUSH6 = 0x65,
    PUSH7 = 0x66,
    PUSH8 = 0x67,
    PUSH9 = 0x68,
    PUSH10 = 0x69,
    PUSH11 = 0x6a,
    PUSH12 = 0x6b,
    PUSH13 = 0x6c,
    PUSH14 = 0x6d,
    PUSH15 = 0x6e,
    PUSH16 = 0x6f,
    PUSH17 = 0x70,
    PUSH18 = 0x71,
    PUSH19 = 0x72,
    PUSH20 = 0x73,
    PUSH21 = 0x74,
    PUSH22 = 0x75,
    PUSH23 = 0x76,
    PUSH24 = 0x77,
    PUSH25 = 0x78,
    PUSH26 = 0x79,
    PUSH27 = 0x7a,
    PUSH28 = 0x7b,
    PUSH29 = 0x7c,
    PUSH30 = 0x7d,
    PUSH31 = 0x7e,
    PUSH32 = 0x7f,

    // Duplicate
    DUP1 = 0x80,
    DUP2 = 0x81,
    DUP3 = 0x82,
    DUP4 = 0x83,
    DUP5 = 0x84,
    DUP6 = 0x85,
    DUP7 = 0x86,
    DUP8 = 0x87,
    DUP9 = 0x88,
    DUP10 = 0x89,
    DUP11 = 0x8a,
    DUP12 = 0x8b,
    DUP13 = 0x8c,
    DUP14 = 0x8d,
    DUP15 = 0x8e,
    DUP16 = 0x8f,

    // Exchange
    SWAP1 = 0x90,
    SWAP2 = 0x91,
    SWAP3 = 0x92,
    SWAP4 = 0x93,
    SWAP5 = 0x94,
    SWAP6 = 0x95,
    SWAP7 = 0x96,
    SWAP8 = 0x97,
    SWAP9 = 0x98,
    SWAP10 = 0x99,
    SWAP11 = 0x9a,
    SWAP12 = 0x9b,
    SWAP13 = 0x9c,
    SWAP14 = 0x9d,
    SWAP15 = 0x9e,
    SWAP16 = 0x9f,

    // Logging
    LOG0 = 0xa0,
    LOG1 = 0xa1,
    LOG2 = 0xa2,
    LOG3 = 0xa3,
    LOG4 = 0xa4,

    // System
    CREATE = 0xf0,
    CALL = 0xf1,
    CALLCODE = 0xf2,
    RETURN = 0xf3,
    DELEGATECALL = 0xf4,
    CREATE2 = 0xf5,
    STATICCALL = 0xfa,
    REVERT = 0xfd,
    INVALID = 0xfe,
    #[strum(to_string = "SELFDESTRUCT", serialize = "SUICIDE")]
    SELFDESTRUCT = 0xff,
}

/// How the decoder reads operands and results for one instruction family.
///
/// `FixedArity` operands come from the current step's stack and results from
/// the top of the next step's stack, because a result only materialises once
/// the instruction has executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeSpec {
    FixedArity {
        inputs: usize,
        outputs: usize,
        /// Whether a decoded result is recorded as derived from its inputs.
        registers: bool,
    },
    Push {
        width: u8,
    },
    Dup {
        n: usize,
    },
    Swap {
        n: usize,
    },
    Log {
        topics: usize,
    },
    Hash,
    Unmodeled,
}

impl OpcodeSpec {
    const fn fixed(inputs: usize, outputs: usize) -> Self {
        Self::FixedArity {
            inputs,
            outputs,
            registers: false,
        }
    }

    const fn derived(inputs: usize, outputs: usize) -> Self {
        Self::FixedArity {
            inputs,
            outputs,
            registers: true,
        }
    }
}

/// Looks up the decoding rule for a mnemonic as printed by a debugger.
///
/// Returns `None` for mnemonics outside the instruction set; callers decode
/// those as opaque steps.
pub fn lookup(mnemonic: &str) -> Option<OpcodeSpec> {
    mnemonic.parse::<Opcode>().ok().map(Opcode::spec)
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Number of immediate bytes following the opcode in bytecode.
    pub fn immediate_width(self) -> usize {
        let byte: u8 = self.into();
        match byte {
            0x60..=0x7f => usize::from(byte - 0x5f),
            _ => 0,
        }
    }

    /// Instructions that open a message-call frame.
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Opcode::CALL | Opcode::CALLCODE | Opcode::DELEGATECALL | Opcode::STATICCALL
        )
    }

    /// Instructions that open a contract-creation frame.
    pub fn is_create(self) -> bool {
        matches!(self, Opcode::CREATE | Opcode::CREATE2)
    }

    pub fn spec(self) -> OpcodeSpec {
        let byte: u8 = self.into();
        match self {
            Opcode::STOP | Opcode::JUMPDEST => OpcodeSpec::fixed(0, 0),

            Opcode::ADD
            | Opcode::MUL
            | Opcode::SUB
            | Opcode::DIV
            | Opcode::SDIV
            | Opcode::MOD
            | Opcode::SMOD
            | Opcode::EXP
            | Opcode::SIGNEXTEND
            | Opcode::AND
            | Opcode::OR
            | Opcode::XOR
            | Opcode::BYTE
            | Opcode::SHL
            | Opcode::SHR
            | Opcode::SAR => OpcodeSpec::derived(2, 1),
            Opcode::ADDMOD | Opcode::MULMOD => OpcodeSpec::derived(3, 1),
            Opcode::NOT => OpcodeSpec::derived(1, 1),

            Opcode::LT | Opcode::GT | Opcode::SLT | Opcode::SGT | Opcode::EQ => {
                OpcodeSpec::fixed(2, 1)
            }
            Opcode::ISZERO => OpcodeSpec::fixed(1, 1),

            Opcode::SHA3 => OpcodeSpec::Hash,

            Opcode::ADDRESS
            | Opcode::ORIGIN
            | Opcode::CALLER
            | Opcode::CALLVALUE
            | Opcode::CALLDATASIZE
            | Opcode::CODESIZE
            | Opcode::GASPRICE
            | Opcode::RETURNDATASIZE
            | Opcode::COINBASE
            | Opcode::TIMESTAMP
            | Opcode::NUMBER
            | Opcode::DIFFICULTY
            | Opcode::GASLIMIT
            | Opcode::CHAINID
            | Opcode::SELFBALANCE
            | Opcode::BASEFEE
            | Opcode::BLOBBASEFEE
            | Opcode::PC
            | Opcode::MSIZE
            | Opcode::GAS => OpcodeSpec::fixed(0, 1),
            Opcode::BALANCE
            | Opcode::CALLDATALOAD
            | Opcode::EXTCODESIZE
            | Opcode::BLOCKHASH
            | Opcode::BLOBHASH
            | Opcode::MLOAD
            | Opcode::SLOAD
            | Opcode::TLOAD => OpcodeSpec::fixed(1, 1),
            Opcode::CALLDATACOPY | Opcode::CODECOPY | Opcode::RETURNDATACOPY | Opcode::MCOPY => {
                OpcodeSpec::fixed(3, 0)
            }
            Opcode::EXTCODECOPY => OpcodeSpec::fixed(4, 0),

            Opcode::POP | Opcode::JUMP | Opcode::SELFDESTRUCT => OpcodeSpec::fixed(1, 0),
            Opcode::MSTORE
            | Opcode::MSTORE8
            | Opcode::SSTORE
            | Opcode::TSTORE
            | Opcode::JUMPI
            | Opcode::RETURN
            | Opcode::REVERT => OpcodeSpec::fixed(2, 0),

            Opcode::PUSH0
            | Opcode::PUSH1
            | Opcode::PUSH2
            | Opcode::PUSH3
            | Opcode::PUSH4
            | Opcode::PUSH5
            | Opcode::PUSH6
            | Opcode::PUSH7
            | Opcode::PUSH8
            | Opcode::PUSH9
            | Opcode::PUSH10
            | Opcode::PUSH11
            | Opcode::PUSH12
            | Opcode::PUSH13
            | Opcode::PUSH14
            | Opcode::PUSH15
            | Opcode::PUSH16
            | Opcode::PUSH17
            | Opcode::PUSH18
            | Opcode::PUSH19
            | Opcode::PUSH20
            | Opcode::PUSH21
            | Opcode::PUSH22
            | Opcode::PUSH23
            | Opcode::PUSH24
            | Opcode::PUSH25
            | Opcode::PUSH26
            | Opcode::PUSH27
            | Opcode::PUSH28
            | Opcode::PUSH29
            | Opcode::PUSH30
            | Opcode::PUSH31
            | Opcode::PUSH32 => OpcodeSpec::Push {
                width: byte - 0x5f,
            },

            Opcode::DUP1
            | Opcode::DUP2
            | Opcode::DUP3
            | Opcode::DUP4
            | Opcode::DUP5
            | Opcode::DUP6
            | Opcode::DUP7
            | Opcode::DUP8
            | Opcode::DUP9
            | Opcode::DUP10
            | Opcode::DUP11
            | Opcode::DUP12
            | Opcode::DUP13
            | Opcode::DUP14
            | Opcode::DUP15
            | Opcode::DUP16 => OpcodeSpec::Dup {
                n: usize::from(byte - 0x7f),
            },

            Opcode::SWAP1
            | Opcode::SWAP2
            | Opcode::SWAP3
            | Opcode::SWAP4
            | Opcode::SWAP5
            | Opcode::SWAP6
            | Opcode::SWAP7
            | Opcode::SWAP8
            | Opcode::SWAP9
            | Opcode::SWAP10
            | Opcode::SWAP11
            | Opcode::SWAP12
            | Opcode::SWAP13
            | Opcode::SWAP14
            | Opcode::SWAP15
            | Opcode::SWAP16 => OpcodeSpec::Swap {
                n: usize::from(byte - 0x8f),
            },

            Opcode::LOG0 | Opcode::LOG1 | Opcode::LOG2 | Opcode::LOG3 | Opcode::LOG4 => {
                OpcodeSpec::Log {
                    topics: usize::from(byte - 0xa0),
                }
            }

            Opcode::CREATE => OpcodeSpec::fixed(3, 1),
            Opcode::CALL | Opcode::CALLCODE => OpcodeSpec::fixed(7, 1),
            Opcode::DELEGATECALL | Opcode::STATICCALL => OpcodeSpec::fixed(6, 1),

            // No fixed model is safe for these; they decode as opaque steps.
            Opcode::EXTCODEHASH | Opcode::CREATE2 | Opcode::INVALID => OpcodeSpec::Unmodeled,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_mnemonics_round_trip_through_bytes() {
        for opcode in Opcode::iter() {
            let byte: u8 = opcode.into();
            assert_eq!(Opcode::try_from(byte).unwrap(), opcode);
            assert_eq!(opcode.mnemonic().parse::<Opcode>().unwrap(), opcode);
        }
        assert!(Opcode::try_from(0x0c).is_err());
    }

    #[test]
    fn test_aliases() {
        assert_eq!("KECCAK256".parse::<Opcode>().unwrap(), Opcode::SHA3);
        assert_eq!("PREVRANDAO".parse::<Opcode>().unwrap(), Opcode::DIFFICULTY);
        assert_eq!("SUICIDE".parse::<Opcode>().unwrap(), Opcode::SELFDESTRUCT);
        assert_eq!(Opcode::SHA3.to_string(), "SHA3");
    }

    #[test]
    fn test_families() {
        assert_eq!(lookup("PUSH1"), Some(OpcodeSpec::Push { width: 1 }));
        assert_eq!(lookup("PUSH32"), Some(OpcodeSpec::Push { width: 32 }));
        assert_eq!(lookup("PUSH0"), Some(OpcodeSpec::Push { width: 0 }));
        assert_eq!(lookup("DUP16"), Some(OpcodeSpec::Dup { n: 16 }));
        assert_eq!(lookup("SWAP3"), Some(OpcodeSpec::Swap { n: 3 }));
        assert_eq!(lookup("LOG4"), Some(OpcodeSpec::Log { topics: 4 }));
        assert_eq!(lookup("KECCAK256"), Some(OpcodeSpec::Hash));
        assert_eq!(lookup("CREATE2"), Some(OpcodeSpec::Unmodeled));
        assert_eq!(lookup("NOT_AN_OPCODE"), None);
    }

    #[test]
    fn test_registration_flags() {
        assert_eq!(
            lookup("ADD"),
            Some(OpcodeSpec::FixedArity {
                inputs: 2,
                outputs: 1,
                registers: true
            })
        );
        assert_eq!(
            lookup("LT"),
            Some(OpcodeSpec::FixedArity {
                inputs: 2,
                outputs: 1,
                registers: false
            })
        );
        assert_eq!(
            lookup("CALL"),
            Some(OpcodeSpec::FixedArity {
                inputs: 7,
                outputs: 1,
                registers: false
            })
        );
    }

    #[test]
    fn test_immediate_width() {
        assert_eq!(Opcode::PUSH0.immediate_width(), 0);
        assert_eq!(Opcode::PUSH1.immediate_width(), 1);
        assert_eq!(Opcode::PUSH32.immediate_width(), 32);
        assert_eq!(Opcode::ADD.immediate_width(), 0);
    }
}
