use std::io::Write;

use owo_colors::OwoColorize;

use crate::catalog::VideoRecord;

/// One answer to the selection prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// A 1-based serial number present in the listing.
    Serial(usize),
    OutOfRange(usize),
    All,
    Quit,
    Invalid(String),
}

impl Choice {
    /// Interpret `input` against a listing of `count` videos.
    pub fn parse(input: &str, count: usize) -> Self {
        let input = input.trim();
        match input {
            "y" | "Y" => return Choice::All,
            "q" | "Q" => return Choice::Quit,
            _ => {}
        }

        if input.is_empty() || !input.chars().all(|c| c.is_ascii_digit()) {
            return Choice::Invalid(input.to_string());
        }

        match input.parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => Choice::Serial(n),
            Ok(n) => Choice::OutOfRange(n),
            Err(_) => Choice::Invalid(input.to_string()),
        }
    }
}

pub fn print_header() {
    println!(
        "{}",
        format!("{:>4}  {:<40}  {}", "No.", "Title", "Url").bold().green()
    );
}

pub fn print_row(serial: usize, video: &VideoRecord) {
    println!(
        "{:>4}  {:<40}  {}",
        serial.blue(),
        video.title.yellow(),
        video.url.green()
    );
}

pub fn prompt(message: &str) {
    print!("{message}");
    // a prompt that fails to show still accepts input
    let _ = std::io::stdout().flush();
}

pub fn success(message: &str) {
    println!("{}", message.bold().green());
}

pub fn info(message: &str) {
    println!("{}", message.bold().cyan());
}

pub fn error(message: &str) {
    println!("{}", message.bold().red());
}
