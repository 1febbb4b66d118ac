//! System prompt
//!
//! A one-line header of workspace, tools and rules, then optional script
//! guidance and instructions.

use std::path::Path;

/// Inputs to the system prompt
#[derive(Debug, Clone)]
pub struct PromptParts<'a> {
    pub workspace: &'a Path,
    /// Capabilities the model can call directly
    pub tools: Vec<String>,
    /// Capabilities callable from orchestration scripts
    pub script_capabilities: Vec<String>,
    /// Agent-type instructions
    pub instructions: Option<&'a str>,
    /// Contents of configured instruction files
    pub instruction_files: Vec<String>,
}

const SCRIPT_GUIDE: &str = "\
orchestrate script: `let x = e`, `if c { } else { }`, `for x in xs { }`, `return e`. \
Call tools as functions, positionally or by name: `read_file(\"a.txt\")`, `grep(pattern=\"fn\", path=\"src\")`. \
Each call returns {ok, output, error}. \
Parallel: `gather([spawn shell(\"ls\"), spawn git_status()])` keeps order. \
print(...) output and the `result` variable are returned.";

pub fn system_prompt(parts: &PromptParts<'_>) -> String {
    let mut prompt = format!(
        "cwd:{}|tools:{}|rule:simple=direct,multi=orchestrate,ask=answer|err=explain",
        parts.workspace.display(),
        parts.tools.join(",")
    );

    if parts.tools.iter().any(|t| t == "orchestrate") {
        prompt.push('\n');
        prompt.push_str(SCRIPT_GUIDE);
        if !parts.script_capabilities.is_empty() {
            prompt.push_str(&format!(
                "\nscript tools: {}",
                parts.script_capabilities.join(", ")
            ));
        }
    }

    if let Some(instructions) = parts.instructions {
        prompt.push_str("\n\n");
        prompt.push_str(instructions.trim());
    }

    for extra in &parts.instruction_files {
        let extra = extra.trim();
        if !extra.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(extra);
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_header() {
        let prompt = system_prompt(&PromptParts {
            workspace: Path::new("/work"),
            tools: vec!["read_file".into(), "shell".into()],
            script_capabilities: Vec::new(),
            instructions: None,
            instruction_files: Vec::new(),
        });
        assert_eq!(
            prompt,
            "cwd:/work|tools:read_file,shell|rule:simple=direct,multi=orchestrate,ask=answer|err=explain"
        );
    }

    #[test]
    fn test_script_guide_only_with_orchestrate() {
        let prompt = system_prompt(&PromptParts {
            workspace: Path::new("/work"),
            tools: vec!["orchestrate".into()],
            script_capabilities: vec!["read_file".into(), "grep".into()],
            instructions: Some("  Be brief.  "),
            instruction_files: vec!["Use tabs.".into(), "  ".into()],
        });
        assert!(prompt.contains("gather("));
        assert!(prompt.contains("script tools: read_file, grep"));
        assert!(prompt.ends_with("\n\nBe brief.\n\nUse tabs."));
    }
}
