//! Plain-text rendering of the daily digest.

use crate::{DailyDigest, Homework, Lesson};

const DATE_FORMAT: &str = "%d.%m.%Y";

/// Render `digest` as a multi-line message.
///
/// Sections always appear in the same order: greeting, date header, lessons,
/// homework due, homework with a custom deadline, footer.
pub fn render_digest(digest: &DailyDigest) -> String {
    let date = digest.date.format(DATE_FORMAT);
    let mut out = String::new();

    match digest.display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => out.push_str(&format!("Hi, {name}!\n")),
        _ => out.push_str("Hi!\n"),
    }
    out.push('\n');
    out.push_str(&format!("Plan for {date}:\n"));
    out.push('\n');

    if digest.lessons.is_empty() {
        out.push_str("No classes tomorrow, time to rest!\n\n");
    } else {
        out.push_str("Classes:\n");
        for lesson in &digest.lessons {
            out.push_str(&format_lesson(lesson));
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str("Homework due tomorrow:\n");
    push_homework_list(&mut out, &digest.homework_due);
    out.push('\n');

    out.push_str(&format!("Homework with a deadline on {date}:\n"));
    push_homework_list(&mut out, &digest.custom_deadlines);

    out.push_str("\nUse /homework to manage tasks or /addhw to add a new one.");
    out
}

fn push_homework_list(out: &mut String, items: &[Homework]) {
    if items.is_empty() {
        out.push_str("- none\n");
        return;
    }
    for item in items {
        out.push_str(&format_homework(item));
        out.push('\n');
    }
}

/// `- Subject (08:30 - 10:00) room`
pub fn format_lesson(lesson: &Lesson) -> String {
    let subject = lesson.subject.trim();
    let mut line = format!("- {}", if subject.is_empty() { "-" } else { subject });
    if let (Some(start), Some(end)) = (lesson.start, lesson.end) {
        line.push_str(&format!(" ({} - {})", start.format("%H:%M"), end.format("%H:%M")));
    }
    if let Some(room) = lesson.room.as_deref().filter(|room| !room.trim().is_empty()) {
        line.push(' ');
        line.push_str(room.trim());
    }
    line
}

/// `ID: 3 | Subject: description (due 2026-03-03) [pending]`
pub fn format_homework(item: &Homework) -> String {
    let description = item.description.trim();
    format!(
        "ID: {} | {}: {} (due {}) [{}]",
        item.id,
        item.subject,
        if description.is_empty() { "-" } else { description },
        item.due,
        if item.completed { "done" } else { "pending" },
    )
}
