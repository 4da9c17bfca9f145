/// Output dimension of well-known embedding models.
///
/// Accepts bare names, `org/name` Hugging Face ids and Ollama `name:tag`
/// references.
pub fn known_dimension(model: &str) -> Option<usize> {
    let name = model.trim().to_lowercase();
    let name = name.rsplit('/').next().unwrap_or(&name);
    let name = name.split(':').next().unwrap_or(name);

    let dim = match name {
        "nomic-embed-text" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "mxbai-embed-large" | "mxbai-embed-large-v1" => 1024,
        "all-minilm" | "all-minilm-l6-v2" | "all-minilm-l12-v2" | "paraphrase-minilm-l6-v2" => 384,
        "all-mpnet-base-v2" => 768,
        "snowflake-arctic-embed" => 1024,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "text-embedding-3-large" => 3072,
        n if n.starts_with("bge-small") => 384,
        n if n.starts_with("bge-base") => 768,
        n if n.starts_with("bge-large") || n.starts_with("bge-m3") => 1024,
        _ => return None,
    };
    Some(dim)
}
