//! Flow variant catalog.
//!
//! Each numbered variant wraps the same source/sink pair in a different
//! control-flow or data-flow obstacle. The obstacle is recorded here as an
//! explicit [`Opacity`] so reports can group analyzer precision by it instead
//! of re-deriving it from global flags or function pointers in the fixtures.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowVariant(pub u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCategory {
    Baseline,
    ControlFlow,
    DataFlow,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opacity {
    None,
    ConstantCondition,
    GlobalFlag,
    OpaqueCall,
    Loop,
    Goto,
    Alias,
    Pointer,
    Call,
    FunctionPointer,
    GlobalData,
    CrossFile,
    Aggregate,
    Container,
    VirtualDispatch,
    ObjectLifetime,
    Unknown,
}

impl Opacity {
    /// Obstacles that require tracking values across function boundaries.
    pub fn is_interprocedural(&self) -> bool {
        matches!(
            self,
            Opacity::OpaqueCall
                | Opacity::Call
                | Opacity::FunctionPointer
                | Opacity::GlobalData
                | Opacity::CrossFile
                | Opacity::Aggregate
                | Opacity::Container
                | Opacity::VirtualDispatch
                | Opacity::ObjectLifetime
        )
    }
}

impl FlowVariant {
    pub fn category(&self) -> FlowCategory {
        match self.0 {
            1 => FlowCategory::Baseline,
            2..=22 => FlowCategory::ControlFlow,
            31..=84 => FlowCategory::DataFlow,
            _ => FlowCategory::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self.0 {
            1 => "Baseline",
            2 => "Control flow: if(1) and if(0)",
            3 => "Control flow: if(5==5) and if(5!=5)",
            4 => "Control flow: if(STATIC_CONST_TRUE) and if(STATIC_CONST_FALSE)",
            5 => "Control flow: if(staticTrue) and if(staticFalse)",
            6 => "Control flow: if(STATIC_CONST_FIVE==5) and if(STATIC_CONST_FIVE!=5)",
            7 => "Control flow: if(staticFive==5) and if(staticFive!=5)",
            8 => "Control flow: if(staticReturnsTrue()) and if(staticReturnsFalse())",
            9 => "Control flow: if(GLOBAL_CONST_TRUE) and if(GLOBAL_CONST_FALSE)",
            10 => "Control flow: if(globalTrue) and if(globalFalse)",
            11 => "Control flow: if(globalReturnsTrue()) and if(globalReturnsFalse())",
            12 => "Control flow: if(globalReturnsTrueOrFalse())",
            13 => "Control flow: if(GLOBAL_CONST_FIVE==5) and if(GLOBAL_CONST_FIVE!=5)",
            14 => "Control flow: if(globalFive==5) and if(globalFive!=5)",
            15 => "Control flow: switch(6) and switch(7)",
            16 => "Control flow: while(1)",
            17 => "Control flow: for loops",
            18 => "Control flow: goto statements",
            21 => "Control flow: flow controlled by value of a static global variable",
            22 => "Control flow: flow controlled by value of a global variable, sinks in a separate file",
            31 => "Data flow: copy of data within the same function",
            32 => "Data flow: two pointers to the same value within the same function",
            33 => "Data flow: C++ reference to data within the same function",
            34 => "Data flow: union with two ways of accessing the same data",
            41 => "Data flow: argument from one function to another in the same file",
            42 => "Data flow: return value from one function to another in the same file",
            43 => "Data flow: C++ reference from one function to another in the same file",
            44 => "Data/control flow: argument to a function called via a function pointer",
            45 => "Data flow: static global variable from one function to another",
            51 => "Data flow: argument from one function to another in different files",
            52 => "Data flow: argument through three functions in three files",
            53 => "Data flow: argument through four functions in four files",
            54 => "Data flow: argument through five functions in five files",
            61 => "Data flow: return value from one function to another in different files",
            62 => "Data flow: C++ reference from one function to another in different files",
            63 => "Data flow: pointer to data passed between functions in different files",
            64 => "Data flow: void pointer to data passed between functions in different files",
            65 => "Data/control flow: argument to a function in another file called via a function pointer",
            66 => "Data flow: array passed between functions in different files",
            67 => "Data flow: struct passed between functions in different files",
            68 => "Data flow: global variable shared between functions in different files",
            72 => "Data flow: vector passed between functions in different files",
            73 => "Data flow: list passed between functions in different files",
            74 => "Data flow: map passed between functions in different files",
            81 => "Data flow: parameter to a virtual method called via a reference",
            82 => "Data flow: parameter to a virtual method called via a pointer",
            83 => "Data flow: constructor and destructor of a stack object",
            84 => "Data flow: constructor and destructor of a heap object",
            _ => "Unknown flow variant",
        }
    }

    pub fn opacity(&self) -> Opacity {
        match self.0 {
            1 => Opacity::None,
            2 | 3 | 4 | 6 | 9 | 13 | 15 => Opacity::ConstantCondition,
            5 | 7 | 10 | 14 | 21 | 22 => Opacity::GlobalFlag,
            8 | 11 | 12 => Opacity::OpaqueCall,
            16 | 17 => Opacity::Loop,
            18 => Opacity::Goto,
            31 | 34 => Opacity::Alias,
            32 | 33 | 63 | 64 => Opacity::Pointer,
            41 | 42 | 43 => Opacity::Call,
            44 | 65 => Opacity::FunctionPointer,
            45 | 68 => Opacity::GlobalData,
            51..=54 | 61 | 62 => Opacity::CrossFile,
            66 | 67 => Opacity::Aggregate,
            72..=74 => Opacity::Container,
            81 | 82 => Opacity::VirtualDispatch,
            83 | 84 => Opacity::ObjectLifetime,
            _ => Opacity::Unknown,
        }
    }

    /// Part letters a complete multi-file case consists of. Empty for
    /// single-file variants. 81-84 carry only `a`; their other units are
    /// named by role.
    pub fn parts(&self) -> Vec<char> {
        let count = match self.0 {
            22 | 51 | 61..=68 | 72..=74 => 2,
            52 => 3,
            53 => 4,
            54 => 5,
            81..=84 => 1,
            _ => 0,
        };
        ('a'..='e').take(count).collect()
    }

    pub fn file_count(&self) -> usize {
        self.parts().len().max(1)
    }
}

impl fmt::Display for FlowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_digit_display() {
        assert_eq!(FlowVariant(9).to_string(), "09");
        assert_eq!(FlowVariant(54).to_string(), "54");
    }

    #[test]
    fn multi_file_parts() {
        assert_eq!(FlowVariant(54).parts(), vec!['a', 'b', 'c', 'd', 'e']);
        assert_eq!(FlowVariant(63).parts(), vec!['a', 'b']);
        assert_eq!(FlowVariant(22).file_count(), 2);
        assert!(FlowVariant(44).parts().is_empty());
        assert_eq!(FlowVariant(44).file_count(), 1);
    }

    #[test]
    fn container_and_dispatch_parts() {
        for flow in 72..=74 {
            assert_eq!(FlowVariant(flow).parts(), vec!['a', 'b']);
            assert_eq!(FlowVariant(flow).file_count(), 2);
        }
        // 81-84 pair `a` with role-named units such as `_81_bad.cpp`.
        for flow in 81..=84 {
            assert_eq!(FlowVariant(flow).parts(), vec!['a']);
            assert_eq!(FlowVariant(flow).file_count(), 1);
        }
        assert!(FlowVariant(75).parts().is_empty());
    }

    #[test]
    fn obstacles_are_explicit() {
        assert_eq!(FlowVariant(44).opacity(), Opacity::FunctionPointer);
        assert_eq!(FlowVariant(22).opacity(), Opacity::GlobalFlag);
        assert_eq!(FlowVariant(18).opacity(), Opacity::Goto);
        assert!(FlowVariant(68).opacity().is_interprocedural());
        assert!(!FlowVariant(9).opacity().is_interprocedural());
    }

    #[test]
    fn categories() {
        assert_eq!(FlowVariant(1).category(), FlowCategory::Baseline);
        assert_eq!(FlowVariant(18).category(), FlowCategory::ControlFlow);
        assert_eq!(FlowVariant(65).category(), FlowCategory::DataFlow);
        assert_eq!(FlowVariant(99).category(), FlowCategory::Unknown);
        assert_eq!(FlowVariant(99).description(), "Unknown flow variant");
    }
}
