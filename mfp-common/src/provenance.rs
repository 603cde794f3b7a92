//! Provenance notes
//!
//! Every estimator output is accompanied by a human-readable Markdown note
//! recording when it was produced, with which parameters, and by which
//! package version. Notes never overwrite each other; a name collision
//! appends a counter.

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::Result;

/// Builder for a Markdown provenance note.
#[derive(Debug, Clone)]
pub struct ProvenanceNote {
    title: String,
    package: String,
    version: String,
    summary: Option<String>,
    parameters: Vec<(String, String)>,
    sections: Vec<(String, String)>,
}

impl ProvenanceNote {
    /// Start a note for a named service, recording the producing package
    /// and its version.
    pub fn new(title: &str, package: &str, version: &str) -> Self {
        Self {
            title: title.to_string(),
            package: package.to_string(),
            version: version.to_string(),
            summary: None,
            parameters: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn summary(mut self, text: &str) -> Self {
        self.summary = Some(text.to_string());
        self
    }

    pub fn parameter(mut self, name: &str, value: impl ToString) -> Self {
        self.parameters.push((name.to_string(), value.to_string()));
        self
    }

    /// Append a free-form section, e.g. fitted coefficients.
    pub fn section(mut self, heading: &str, body: &str) -> Self {
        self.sections
            .push((heading.to_string(), body.to_string()));
        self
    }

    /// Render the note as Markdown.
    pub fn render(&self) -> String {
        let date = Local::now().format("%Y/%m/%d, %H:%M:%S");
        let mut text = format!(
            "# {title}\nDate: {date}\n\n\
             `{title}` is a service provided by the facility for advanced \
             imaging and microscopy for biomedical research. Consult with \
             the facility on appropriate usage.\n\n",
            title = self.title,
            date = date,
        );
        if let Some(summary) = &self.summary {
            text.push_str(&format!("## Summary\n{}\n\n", summary));
        }
        text.push_str("## Parameters\n");
        for (name, value) in &self.parameters {
            text.push_str(&format!("* `{}`: {}\n", name, value));
        }
        text.push('\n');
        for (heading, body) in &self.sections {
            text.push_str(&format!("## {}\n{}\n\n", heading, body));
        }
        text.push_str(&format!(
            "## Packages\n* {}: v{}\n",
            self.package, self.version
        ));
        text
    }

    /// Write the note next to an output image, replacing the image
    /// extension with `.md`. An existing note of the same name is kept and
    /// a `_1`, `_2`, ... counter is appended instead.
    pub fn write_beside(&self, image_path: impl AsRef<Path>) -> Result<PathBuf> {
        let image_path = image_path.as_ref();
        let stem = image_path.with_extension("");
        let path = unique_note_path(&stem);
        std::fs::write(&path, self.render())?;
        Ok(path)
    }
}

fn unique_note_path(stem: &Path) -> PathBuf {
    let mut path = stem.with_extension("md");
    let mut counter = 1;
    while path.exists() {
        path = PathBuf::from(format!("{}_{}.md", stem.display(), counter));
        counter += 1;
    }
    path
}
