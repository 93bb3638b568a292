//! Prompt builders for the phase tasks.
//!
//! Each builder returns `(system, user)` and names the exact JSON shape the
//! task will parse.

use super::session::{Chapter, PlannedChapter};

const JSON_ONLY: &str = "Respond with a single JSON object and nothing else.";

pub fn initial_queries(subject: &str, report_structure: &str, count: usize) -> (String, String) {
    let system = format!(
        "You are a research planner preparing a multi-chapter report. {JSON_ONLY}"
    );
    let user = format!(
        "<Topic>\n{subject}\n</Topic>\n\n\
         <Report structure>\n{report_structure}\n</Report structure>\n\n\
         Write {count} web search queries that together give a broad overview of the topic \
         and help decide how to divide it into chapters. Make each query specific enough \
         to find authoritative sources.\n\n\
         Shape: {{\"queries\": [\"...\"]}}"
    );
    (system, user)
}

pub fn planning(
    subject: &str,
    report_structure: &str,
    chapter_count: usize,
    subtopic_count: usize,
    context: &str,
) -> (String, String) {
    let system = format!(
        "You are planning the outline of a multi-chapter report. {JSON_ONLY}"
    );
    let user = format!(
        "<Topic>\n{subject}\n</Topic>\n\n\
         <Report structure>\n{report_structure}\n</Report structure>\n\n\
         <Context>\n{context}\n</Context>\n\n\
         Plan exactly {chapter_count} chapters. Every chapter needs a unique title, a one \
         or two sentence description, and exactly {subtopic_count} subtopic titles in \
         learning order.\n\n\
         Shape: {{\"chapters\": [{{\"title\": \"...\", \"description\": \"...\", \
         \"subtopics\": [\"...\"]}}]}}"
    );
    (system, user)
}

pub fn chapter_queries(subject: &str, chapter: &Chapter, max_queries: usize) -> (String, String) {
    let system = format!(
        "You write targeted web search queries for one chapter of a report. {JSON_ONLY}"
    );
    let user = format!(
        "<Report topic>\n{subject}\n</Report topic>\n\n\
         <Chapter>\n{}\n</Chapter>\n\n\
         Write at most {max_queries} search queries for this chapter. Cover every subtopic, \
         prefer documentation and technical sources, and name the subtopic each query \
         serves using its exact title.\n\n\
         Shape: {{\"queries\": [{{\"query\": \"...\", \"purpose\": \"...\", \
         \"target_subtopic\": \"...\"}}]}}",
        describe(chapter)
    );
    (system, user)
}

pub fn chapter_writing(subject: &str, chapter: &Chapter, sources: &str) -> (String, String) {
    let system = format!(
        "You write one chapter of a technical report from the supplied sources. \
         Use clear language, no marketing tone, and cite only the sources given. {JSON_ONLY}"
    );
    let user = format!(
        "<Report topic>\n{subject}\n</Report topic>\n\n\
         <Chapter>\n{}\n</Chapter>\n\n\
         <Source material>\n{sources}\n</Source material>\n\n\
         Write a short overview of the chapter and one section per subtopic, in the order \
         listed, {} sections in total. Each section has the subtopic title, a one sentence \
         description, detailed content, and the sources it used.\n\n\
         Shape: {{\"overview\": \"...\", \"sections\": [{{\"title\": \"...\", \
         \"description\": \"...\", \"content\": \"...\", \
         \"sources\": [{{\"title\": \"...\", \"url\": \"...\"}}]}}]}}",
        describe(chapter),
        chapter.subtopics.len()
    );
    (system, user)
}

/// Render planned chapters compactly, for logs and the CLI.
pub fn outline(chapters: &[PlannedChapter]) -> String {
    chapters
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c.title))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe(chapter: &Chapter) -> String {
    let subtopics = chapter
        .subtopics
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Title: {}\nDescription: {}\nSubtopics:\n{}",
        chapter.title, chapter.description, subtopics
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter() -> Chapter {
        Chapter::planned(&PlannedChapter {
            title: "Storage engines".into(),
            description: "How data hits disk".into(),
            subtopics: vec!["Pages".into(), "Indexes".into()],
        })
    }

    #[test]
    fn test_initial_queries_mentions_count() {
        let (system, user) = initial_queries("graph databases", "structure", 2);
        assert!(system.contains("JSON"));
        assert!(user.contains("graph databases"));
        assert!(user.contains("Write 2 web search queries"));
    }

    #[test]
    fn test_planning_states_arity() {
        let (_, user) = planning("rust", "structure", 3, 6, "ctx");
        assert!(user.contains("exactly 3 chapters"));
        assert!(user.contains("exactly 6 subtopic titles"));
        assert!(user.contains("<Context>\nctx\n</Context>"));
    }

    #[test]
    fn test_chapter_prompts_list_subtopics() {
        let (_, user) = chapter_queries("db", &chapter(), 4);
        assert!(user.contains("- Pages\n- Indexes"));
        let (_, user) = chapter_writing("db", &chapter(), "Sources: none");
        assert!(user.contains("2 sections in total"));
        assert!(user.contains("Sources: none"));
    }

    #[test]
    fn test_outline() {
        let plans = vec![
            PlannedChapter {
                title: "One".into(),
                description: String::new(),
                subtopics: vec![],
            },
            PlannedChapter {
                title: "Two".into(),
                description: String::new(),
                subtopics: vec![],
            },
        ];
        assert_eq!(outline(&plans), "1. One\n2. Two");
    }
}
