//! Permission flag handed to the runner by the identity layer.

use serde::{Deserialize, Serialize};

/// What a connected socket may do. Authorization itself happens upstream;
/// the runner only enforces the flag it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Browse files, receive terminal output and process status.
    Read,
    /// Everything in `Read`, plus mutations, terminal input and run control.
    Write,
}

impl Access {
    pub fn can_write(self) -> bool {
        matches!(self, Access::Write)
    }
}

impl std::str::FromStr for Access {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Access::Read),
            "write" => Ok(Access::Write),
            other => Err(format!("unknown access level '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_access() {
        assert_eq!("read".parse::<Access>().unwrap(), Access::Read);
        assert_eq!("write".parse::<Access>().unwrap(), Access::Write);
        assert!("admin".parse::<Access>().is_err());
        assert!(Access::Write.can_write());
        assert!(!Access::Read.can_write());
    }
}
