use crate::ui::{theme, Icons};
use indicatif::HumanDuration;
use owo_colors::OwoColorize;
use std::time::Duration;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

/// `icon label: value` on one line
pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, label.style(theme().dim.clone()), value);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn section(title: &str) {
    println!();
    println!("{}", title.style(theme().header.clone()));
}

pub fn timing(elapsed: Duration) {
    println!(
        "{} {}",
        Icons::CLOCK,
        format!("Done in {}", HumanDuration(elapsed)).style(theme().dim.clone())
    );
}

/// Indented `label value` row with the labels aligned
pub fn summary_row(label: &str, value: &str) {
    println!("  {:<16} {}", label.style(theme().dim.clone()), value);
}
