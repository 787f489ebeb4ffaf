//! Jinja-style rendering for subjects, bodies and attachment file names
//!
//! Templates are rendered with `minijinja`, so `{{ name }}` placeholders,
//! filters such as `default`, `upper` or `title`, and `{% if %}` blocks
//! behave as in Jinja2. Rendering never fails: a template that does not
//! compile or render comes back unchanged, and undefined variables render
//! empty.

use minijinja::Environment;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Shared environment; no auto-escaping, lenient undefined values
static ENV: LazyLock<Environment<'static>> = LazyLock::new(Environment::new);

/// Render `template` with `variables` as the context
///
/// # Examples
///
/// ```
/// use campaign_dispatch::template::render;
/// use std::collections::HashMap;
///
/// let vars = HashMap::from([("name".to_string(), "Ana".to_string())]);
/// assert_eq!(render("Hello {{ name }}!", &vars), "Hello Ana!");
/// assert_eq!(render("Hello {{ name", &vars), "Hello {{ name");
/// ```
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    match ENV.render_str(template, variables) {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::debug!(error = %e, "template did not render, using it verbatim");
            template.to_string()
        }
    }
}

/// Distinct variables `template` reads from its context, sorted
///
/// A template that does not compile yields no variables.
pub fn extract_variables(template: &str) -> Vec<String> {
    let Ok(compiled) = ENV.template_from_str(template) else {
        return Vec::new();
    };
    let mut names: Vec<String> = compiled.undeclared_variables(false).into_iter().collect();
    names.sort();
    names
}
