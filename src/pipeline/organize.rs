use super::services::{Assets, Content, GenerationParams};

const EXCERPT_CHARS: usize = 160;

/// Prepare content and assets for publishing: slug, excerpt, tags, featured asset first.
pub fn organize(content: &mut Content, assets: &mut Assets, params: &GenerationParams) {
    if content.slug.as_deref().is_none_or(str::is_empty) {
        content.slug = Some(slugify(&content.title));
    }
    if content.excerpt.as_deref().is_none_or(str::is_empty) {
        content.excerpt = Some(excerpt(&content.body, EXCERPT_CHARS));
    }

    let mut tags: Vec<String> = Vec::new();
    for tag in content.tags.iter().chain(params.keywords.iter()) {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    content.tags = tags;

    // Stable: keeps generation order within featured/non-featured.
    assets.items.sort_by_key(|a| !a.featured);
}

pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

/// First `max_chars` of the body, cut at a word boundary.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(' ') {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{trimmed}...")
}
