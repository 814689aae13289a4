//! Prompt templates used by the tools, the reasoning session and the fast path.

use super::memory::Turn;
use super::retrieval::RetrievedChunk;

/// Fixed query the summary tool retrieves with, whatever the caller asked
pub const SUMMARY_CANONICAL_QUERY: &str = "main content and key points";

pub const NO_CONTEXT_NOTICE: &str = "No relevant passages were found in the knowledge base.";

pub fn analyze_prompt(context: &str, query: &str) -> String {
    format!(
        "Using the document content below, answer the user's question or complete the analysis task.\n\n\
         Document content:\n{}\n\n\
         User request: {}\n\n\
         Provide an accurate and detailed analysis:",
        context, query
    )
}

pub fn summarize_prompt(content: &str) -> String {
    format!(
        "Write a high-quality summary of the document content below.\n\n\
         Document content:\n{}\n\n\
         Requirements:\n\
         1. Capture the core ideas, main findings and important conclusions\n\
         2. Highlight what is new or valuable in the material\n\
         3. Keep the structure clear and the wording precise\n\
         4. Aim for 300-600 words\n\n\
         Summary:",
        content
    )
}

/// Final composition over whatever the tools gathered
pub fn compose_prompt(query: &str, findings: &[(String, String)], history: &[Turn]) -> String {
    let mut prompt = String::from(
        "You are an assistant answering questions about a knowledge base. \
         Answer strictly from the tool findings below; if they do not contain the answer, say so clearly.\n\n",
    );

    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(&render_history(history));
        prompt.push('\n');
    }

    prompt.push_str("Tool findings:\n");
    for (tool, output) in findings {
        prompt.push_str(&format!("[{}]\n{}\n\n", tool, output));
    }

    prompt.push_str(&format!("Question: {}\n\nAnswer:", query));
    prompt
}

/// Single-shot retrieval-and-generate prompt
pub fn fast_path_prompt(message: &str, context: &str, history: &[Turn]) -> String {
    let mut prompt = String::from(
        "You are a professional assistant. Answer the user's question from the knowledge base content below.\n\n",
    );
    prompt.push_str(&format!("Knowledge base content:\n{}\n\n", context));

    if !history.is_empty() {
        prompt.push_str("Conversation history:\n");
        prompt.push_str(&render_history(history));
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "User question: {}\n\n\
         Rules:\n\
         1. Answer strictly from the knowledge base content; if it has nothing relevant, say you cannot answer\n\
         2. Be concise, accurate and complete\n\
         3. Cite the source document when you quote it\n\n\
         Answer:",
        message
    ));
    prompt
}

/// Numbered passage block, cut once `max_chars` is exceeded
pub fn passages_context(chunks: &[RetrievedChunk], max_chars: usize) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_NOTICE.to_string();
    }

    let mut context = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        context.push_str(&format!(
            "[Passage {} | {}]\n{}\n\n",
            i + 1,
            chunk.title().unwrap_or("Unknown"),
            chunk.text
        ));
        if context.len() > max_chars {
            tracing::debug!("Context truncated at {} passages (max {} chars)", i + 1, max_chars);
            break;
        }
    }
    context
}

fn render_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|t| format!("{}: {}\n", t.role.as_str(), t.text))
        .collect()
}
