//! FileCheck-style checks for parser description files.
//!
//! A description file carries its own expectations in comment directives:
//! `; RUN:` lines give the driver options, `; CHECK:`, `; CHECK-NEXT:` and
//! `; CHECK-NOT:` lines are matched against the compiled program dump, in
//! the manner of LLVM's FileCheck.

use super::TextProgram;
use crate::core::Target;

/// A CHECK directive extracted from a description file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// CHECK: pattern - match on some later line
    Check(String),
    /// CHECK-NEXT: pattern - match on the line right after the previous match
    CheckNext(String),
    /// CHECK-NOT: pattern - must not appear before the next match
    CheckNot(String),
    /// COM: comment - ignored
    Comment(String),
}

/// A RUN directive: the driver options to compile with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
}

/// Test specification extracted from a description file.
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
    pub source: String,
}

impl TestSpec {
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();
        let mut source_lines = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(run) = trimmed.strip_prefix("; RUN:") {
                let parts: Vec<&str> = run.split_whitespace().collect();
                match parts.split_first() {
                    Some((command, args)) => run_directives.push(RunDirective {
                        command: command.to_string(),
                        args: args.iter().map(|s| s.to_string()).collect(),
                    }),
                    None => return Err("empty RUN directive".to_string()),
                }
            } else if let Some(p) = trimmed.strip_prefix("; CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(p.trim().to_string()));
            } else if let Some(p) = trimmed.strip_prefix("; CHECK-NOT:") {
                check_directives.push(CheckDirective::CheckNot(p.trim().to_string()));
            } else if let Some(p) = trimmed.strip_prefix("; CHECK:") {
                check_directives.push(CheckDirective::Check(p.trim().to_string()));
            } else if let Some(c) = trimmed.strip_prefix("; COM:") {
                check_directives.push(CheckDirective::Comment(c.trim().to_string()));
            } else {
                source_lines.push(line);
            }
        }

        Ok(TestSpec {
            run_directives,
            check_directives,
            source: source_lines.join("\n"),
        })
    }
}

/// Compiles description files and validates their output.
pub struct TestRunner {
    verbose: bool,
}

impl TestRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn run_test(&self, spec: &TestSpec) -> Result<(), String> {
        for run in &spec.run_directives {
            let output = self.execute(&spec.source, run)?;
            self.validate_output(&output, &spec.check_directives)?;
        }
        Ok(())
    }

    /// Compile with the RUN options and render what the driver would print.
    pub fn execute(&self, source: &str, run: &RunDirective) -> Result<String, String> {
        let mut program = TextProgram::parse(source).map_err(|e| e.to_string())?;

        let mut target = None;
        let mut fifo_depth = None;
        let mut deny_unreachable = false;
        let mut stats = false;
        let mut args = run.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--target" => {
                    let name = args.next().ok_or("--target needs a value")?;
                    target = Some(name.parse::<Target>()?);
                }
                "--fifo-depth" => {
                    let depth = args.next().ok_or("--fifo-depth needs a value")?;
                    fifo_depth = Some(depth.parse::<u32>().map_err(|e| e.to_string())?);
                }
                "--deny-unreachable" => deny_unreachable = true,
                "--stats" => stats = true,
                _ => {}
            }
        }

        let mut options = program.options(Target::Tofino);
        if let Some(target) = target {
            options.target = target;
        }
        options.fifo_depth = fifo_depth;
        options.unreachable_is_error = deny_unreachable;

        let mut output = Vec::new();
        for result in program.compile(options) {
            match result {
                Ok(compiled) => {
                    output.push(compiled.dump());
                    if stats {
                        output.push(compiled.stats.to_string());
                    }
                }
                Err(failure) => {
                    output.push(failure.diagnostics.to_string());
                    output.push(failure.to_string());
                }
            }
        }
        Ok(output.join("\n"))
    }

    pub fn validate_output(&self, output: &str, directives: &[CheckDirective]) -> Result<(), String> {
        let lines: Vec<&str> = output.lines().collect();
        let mut line_idx = 0;
        let mut pending_not: Vec<&str> = Vec::new();

        for directive in directives {
            match directive {
                CheckDirective::Comment(_) => continue,

                CheckDirective::CheckNot(pattern) => pending_not.push(pattern.as_str()),

                CheckDirective::Check(pattern) => {
                    let found = lines
                        .iter()
                        .skip(line_idx)
                        .position(|line| line.contains(pattern.as_str()));
                    let Some(idx) = found else {
                        return Err(format!("CHECK: pattern '{}' not found in output", pattern));
                    };
                    Self::check_not(&pending_not, &lines[line_idx..line_idx + idx])?;
                    pending_not.clear();
                    line_idx += idx + 1;
                    if self.verbose {
                        println!("CHECK: '{}' found at line {}", pattern, line_idx - 1);
                    }
                }

                CheckDirective::CheckNext(pattern) => {
                    let Some(line) = lines.get(line_idx) else {
                        return Err(format!("CHECK-NEXT: no more lines, expected '{}'", pattern));
                    };
                    if !line.contains(pattern.as_str()) {
                        return Err(format!("CHECK-NEXT: expected '{}' but got '{}'", pattern, line));
                    }
                    Self::check_not(&pending_not, &[])?;
                    pending_not.clear();
                    if self.verbose {
                        println!("CHECK-NEXT: '{}' matches at line {}", pattern, line_idx);
                    }
                    line_idx += 1;
                }
            }
        }

        Self::check_not(&pending_not, &lines[line_idx.min(lines.len())..])
    }

    fn check_not(patterns: &[&str], region: &[&str]) -> Result<(), String> {
        for pattern in patterns {
            if let Some(line) = region.iter().find(|l| l.contains(pattern)) {
                return Err(format!("CHECK-NOT: found '{}' in '{}'", pattern, line));
            }
        }
        Ok(())
    }
}
