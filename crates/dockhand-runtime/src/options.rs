//! `docker run` option serialization.
//!
//! Pure and deterministic: the same [`RunOptions`] always yields the same
//! token sequence, in insertion order. Options are not validated; the engine
//! decides what is legal.
//!
//! Conventions:
//! - single-character keys become `-k`, longer keys `--kebab-case`
//!   (`shmSize` becomes `--shm-size`); keys starting with `-` are kept verbatim
//! - `true` emits the bare flag, `false` omits it
//! - a value emits two tokens, `flag value`
//! - a list emits one `flag value` pair per item

use dockhand_common::config::{OptionValue, RunOptions};

/// Serializes options into command-line tokens.
#[must_use]
pub fn serialize_options(options: &RunOptions) -> Vec<String> {
    let mut tokens = Vec::with_capacity(options.len() * 2);
    for (key, value) in options.iter() {
        let flag = option_flag(key);
        match value {
            OptionValue::Flag(true) => tokens.push(flag),
            OptionValue::Flag(false) => {}
            OptionValue::Value(v) => {
                tokens.push(flag);
                tokens.push(v.clone());
            }
            OptionValue::List(items) => {
                for item in items {
                    tokens.push(flag.clone());
                    tokens.push(item.clone());
                }
            }
        }
    }
    tokens
}

/// Renders an option name as a command-line flag.
#[must_use]
pub fn option_flag(key: &str) -> String {
    if key.starts_with('-') {
        return key.to_string();
    }
    if key.chars().count() == 1 {
        return format!("-{key}");
    }
    let mut flag = String::with_capacity(key.len() + 4);
    flag.push_str("--");
    for (i, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                flag.push('-');
            }
            flag.push(c.to_ascii_lowercase());
        } else {
            flag.push(c);
        }
    }
    flag
}
