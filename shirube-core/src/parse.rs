//! パース関連のユーティリティ関数

use anyhow::Result;
use std::path::PathBuf;

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use shirube_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();
    let s = s.strip_prefix('*').unwrap_or(s);

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hexadecimal address '{}': {}", s, e))
    } else {
        s.parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
    }
}

/// ブレークポイントなどの位置指定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// `file:line` または `file:line:column`
    FileLine {
        file: PathBuf,
        line: u64,
        column: u64,
    },
    /// `0x...` または `*addr`
    Address(u64),
    Symbol(String),
}

/// 位置指定をパースする
pub fn parse_location(s: &str) -> Option<Location> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.starts_with('*') || s.starts_with("0x") || s.starts_with("0X") {
        return parse_address(s).ok().map(Location::Address);
    }

    // 右から数値欄を最大2つ取る（Rust のパス `a::b` と区別するため数値のみ）
    let mut fields = s.rsplitn(3, ':');
    let last = fields.next()?;
    let middle = fields.next();
    let first = fields.next();
    match (first, middle, last.parse::<u64>()) {
        (Some(file), Some(line), Ok(column)) if !file.is_empty() => match line.parse::<u64>() {
            Ok(line) => Some(Location::FileLine {
                file: PathBuf::from(file),
                line,
                column,
            }),
            Err(_) => Some(Location::FileLine {
                file: PathBuf::from(format!("{}:{}", file, line)),
                line: column,
                column: 1,
            }),
        },
        (None, Some(file), Ok(line)) if !file.is_empty() => Some(Location::FileLine {
            file: PathBuf::from(file),
            line,
            column: 1,
        }),
        _ => Some(Location::Symbol(s.to_string())),
    }
}

/// 空白で引数を分割する（二重引用符で囲まれた部分は1つの引数）
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_hex() {
        assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0X1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0xabcd").unwrap(), 0xabcd);
        assert_eq!(parse_address("*0xABCD").unwrap(), 0xabcd);
    }

    #[test]
    fn test_parse_address_dec() {
        assert_eq!(parse_address("1234").unwrap(), 1234);
        assert_eq!(parse_address("9999").unwrap(), 9999);
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("xyz").is_err());
        assert!(parse_address("0xghij").is_err());
    }

    #[test]
    fn test_parse_location() {
        assert_eq!(
            parse_location("main.rs:42"),
            Some(Location::FileLine {
                file: PathBuf::from("main.rs"),
                line: 42,
                column: 1
            })
        );
        assert_eq!(
            parse_location("src/lib.rs:10:5"),
            Some(Location::FileLine {
                file: PathBuf::from("src/lib.rs"),
                line: 10,
                column: 5
            })
        );
        assert_eq!(parse_location("*4096"), Some(Location::Address(4096)));
        assert_eq!(
            parse_location("app::run"),
            Some(Location::Symbol("app::run".to_string()))
        );
        assert_eq!(parse_location("  "), None);
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("  a  b c "), vec!["a", "b", "c"]);
        assert_eq!(split_args("rename 3 \"two words\""), vec!["rename", "3", "two words"]);
        assert_eq!(split_args("x \"\""), vec!["x", ""]);
        assert!(split_args("").is_empty());
    }
}
