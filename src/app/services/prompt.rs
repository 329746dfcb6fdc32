use std::io::{self, BufRead, Write};

/// Last-resort source of a verification code: a human operator.
pub trait CodePrompt: Send + Sync {
    fn ask_code(&self, email: &str) -> Option<String>;
}

/// Keeps only a six-digit code out of whatever the operator typed.
pub fn normalize_code(input: &str) -> Option<String> {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    (digits.len() == 6).then_some(digits)
}

pub struct StdinCodePrompt;

impl CodePrompt for StdinCodePrompt {
    fn ask_code(&self, email: &str) -> Option<String> {
        print!("Enter the 6-digit code sent to {email} (blank to skip): ");
        io::stdout().flush().ok()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        normalize_code(&line)
    }
}
