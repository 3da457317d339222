use crate::config::Config;
use crate::grammar::Language;

/// List supported languages and whether the configuration enables them.
pub fn list_languages(config: &Config) {
    let enabled = config.enabled_languages();
    println!("Supported languages:");
    for language in Language::ALL {
        let marker = if enabled.contains(&language) { "" } else { " (disabled)" };
        println!(
            "  {:<8} {:<8} {}{}",
            language.as_str(),
            language.display_name(),
            language
                .extensions()
                .iter()
                .map(|ext| format!(".{}", ext))
                .collect::<Vec<_>>()
                .join(" "),
            marker
        );
    }
}
