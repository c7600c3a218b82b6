//! Styled terminal output for command summaries.
//!
//! Diagnostics go through `tracing` on stderr; this module only prints the
//! human-facing results of a command.

use owo_colors::OwoColorize;

const MINT: (u8, u8, u8) = (152, 225, 152);
const CORAL: (u8, u8, u8) = (255, 160, 160);
const CREAM: (u8, u8, u8) = (255, 230, 160);
const SKY: (u8, u8, u8) = (160, 200, 255);
const LAVENDER: (u8, u8, u8) = (181, 174, 254);
const TEAL: (u8, u8, u8) = (120, 180, 195);
const GREY: (u8, u8, u8) = (160, 160, 160);

fn paint(text: &str, (r, g, b): (u8, u8, u8)) -> String {
    text.truecolor(r, g, b).to_string()
}

fn paint_bold(text: &str, (r, g, b): (u8, u8, u8)) -> String {
    text.truecolor(r, g, b).bold().to_string()
}

/// Colors for label values
pub enum LabelColor {
    Green,
    Blue,
    Yellow,
}

impl LabelColor {
    fn rgb(&self) -> (u8, u8, u8) {
        match self {
            LabelColor::Green => MINT,
            LabelColor::Blue => SKY,
            LabelColor::Yellow => CREAM,
        }
    }
}

pub fn success(message: &str) {
    println!("{} {}", paint_bold("✓", MINT), message.bright_white());
}

/// Success message followed by dimmed details
pub fn success_with_details(message: &str, details: &str) {
    println!(
        "{} {} {}",
        paint_bold("✓", MINT),
        message.bright_white(),
        paint(details, GREY)
    );
}

/// Failure line; printed to stdout because it reports a result, not an error
pub fn error(message: &str) {
    println!("{} {}", paint_bold("✗", CORAL), message.bright_white());
}

/// Section header with a separator line
pub fn section(title: &str) {
    println!("\n{}", paint_bold(title, LAVENDER));
    println!("{}", paint(&"─".repeat(50), GREY));
}

pub fn subsection(title: &str) {
    println!("\n{}", paint(title, TEAL));
    println!("{}", paint(&"·".repeat(30), GREY));
}

pub fn key_value(key: &str, value: &str) {
    println!("  {} {}", paint(&format!("{}:", key), GREY), value.bright_white());
}

pub fn label(text: &str, value: &str, color: LabelColor) {
    println!("  {} {}", paint(text, GREY), paint_bold(value, color.rgb()));
}

/// Stage indicator, e.g. `[2/3] Retrieving configurations`
pub fn step(number: usize, total: usize, description: &str) {
    println!(
        "\n{} {}",
        paint_bold(&format!("[{}/{}]", number, total), LAVENDER),
        description.bright_white()
    );
}

pub fn dimmed(message: &str) {
    println!("{}", paint(message, GREY));
}

pub fn list_item(text: &str) {
    println!("  {} {}", "•".bright_white(), text.bright_white());
}

pub fn list_item_colored(text: &str, color: LabelColor) {
    println!("  {} {}", paint("•", GREY), paint(text, color.rgb()));
}

/// Boxed key/value summary
pub fn summary_box(title: &str, items: &[(String, String)]) {
    let width = items
        .iter()
        .map(|(key, value)| key.chars().count() + value.chars().count() + 2)
        .max()
        .unwrap_or(0)
        .max(title.chars().count())
        + 2;

    println!("\n{}", paint_bold(title, TEAL));
    println!("{}", paint(&format!("┌{}┐", "─".repeat(width)), GREY));
    for (key, value) in items {
        let used = key.chars().count() + value.chars().count() + 2;
        println!(
            "{} {}: {}{}{}",
            paint("│", GREY),
            paint(key, GREY),
            value.bright_white(),
            " ".repeat(width - used - 1),
            paint("│", GREY)
        );
    }
    println!("{}", paint(&format!("└{}┘", "─".repeat(width)), GREY));
}

pub fn blank() {
    println!();
}

pub fn command_suggestion(description: &str, command: &str) {
    println!("  {} {}", paint(description, GREY), paint_bold(command, CREAM));
}

pub fn table_header(columns: &[&str]) {
    let header = columns
        .iter()
        .map(|c| paint_bold(c, TEAL))
        .collect::<Vec<_>>()
        .join(" │ ");
    println!("  {}", header);
    println!("  {}", paint(&"─".repeat(70), GREY));
}

pub fn table_row(values: &[&str]) {
    let row = values
        .iter()
        .map(|v| v.bright_white().to_string())
        .collect::<Vec<_>>()
        .join(" │ ");
    println!("  {}", row);
}
