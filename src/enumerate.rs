use log::info;

use crate::config::Options;




const PLACEHOLDER: &str = "{}";




#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EnumerateError {
    #[error("name template '{template}' must contain exactly one '{{}}' placeholder, found {found}")]
    Placeholder { template: String, found: usize },
}




/**
 * A configuration section name discovered by enumeration, together with the
 * ordinal it was formed from.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedEntry {
    pub name: String,
    pub ordinal: usize,
}




/**
 * A name template with a single integer placeholder, like `mesh_{}`.
 */
#[derive(Clone, Debug)]
pub struct NameTemplate {
    prefix: String,
    suffix: String,
}




// ============================================================================
impl NameTemplate {

    pub fn new(template: &str) -> Result<Self, EnumerateError> {
        let found = template.matches(PLACEHOLDER).count();

        match template.split_once(PLACEHOLDER) {
            Some((prefix, suffix)) if found == 1 => Ok(Self {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
            _ => Err(EnumerateError::Placeholder {
                template: template.to_string(),
                found,
            }),
        }
    }

    pub fn format(&self, ordinal: usize) -> String {
        format!("{}{}{}", self.prefix, ordinal, self.suffix)
    }
}




/**
 * Return the configuration sections `template(0), template(1), ...` in order,
 * stopping before the first ordinal whose section does not exist. An absent
 * `template(0)` is the normal way of saying a family of sections is not
 * configured, and yields an empty list.
 */
pub fn get_all(options: &Options, template: &str) -> Result<Vec<NamedEntry>, EnumerateError> {
    let template = NameTemplate::new(template)?;
    let mut entries = Vec::new();

    for ordinal in 0.. {
        let name = template.format(ordinal);
        info!("Trying '{}'", name);

        if !options.is_section(&name) {
            break;
        }
        entries.push(NamedEntry { name, ordinal });
    }
    Ok(entries)
}
