//! Static safety check
//!
//! Syntax-level deny list over the Python parse tree. Allow by default,
//! reject on:
//! - invalid syntax, including Python 2 `print`/`exec` statements that the
//!   grammar still parses
//! - any import whose top-level module is denied (`import shutil`,
//!   `from subprocess import run`, `import sys as s`)
//! - any call whose final name is denied (`os.system(..)`, `rmtree(..)`),
//!   including importing that name directly (`from os import system`)
//!
//! This is not a sandbox. It only blocks the capability categories listed.

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticVerdict {
    Accept,
    Reject(String),
}

impl StaticVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticPolicy {
    /// Top-level module names that may not be imported
    pub denied_modules: Vec<String>,
    /// Function or method names that may not be called
    pub denied_calls: Vec<String>,
}

/// Process control and tree deletion modules
const DENIED_MODULES: &[&str] = &["subprocess", "sys", "shutil", "pty", "multiprocessing"];

/// Command execution, process spawning and recursive delete primitives
const DENIED_CALLS: &[&str] = &[
    "system",
    "popen",
    "__import__",
    // os.spawn*
    "spawnl",
    "spawnle",
    "spawnlp",
    "spawnlpe",
    "spawnv",
    "spawnve",
    "spawnvp",
    "spawnvpe",
    "posix_spawn",
    "posix_spawnp",
    // os.exec*
    "execl",
    "execle",
    "execlp",
    "execlpe",
    "execv",
    "execve",
    "execvp",
    "execvpe",
    "fork",
    "forkpty",
    // asyncio
    "create_subprocess_shell",
    "create_subprocess_exec",
    "rmtree",
    "removedirs",
];

/// Python 2 statements that are syntax errors under Python 3
const LEGACY_STATEMENTS: &[&str] = &["print_statement", "exec_statement"];

impl Default for StaticPolicy {
    fn default() -> Self {
        Self {
            denied_modules: DENIED_MODULES.iter().map(|s| s.to_string()).collect(),
            denied_calls: DENIED_CALLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl StaticPolicy {
    pub fn check(&self, code: &str) -> StaticVerdict {
        let mut parser = Parser::new();
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        if let Err(e) = parser.set_language(&language) {
            return StaticVerdict::Reject(format!("parser unavailable: {}", e));
        }

        let tree = match parser.parse(code, None) {
            Some(tree) => tree,
            None => return StaticVerdict::Reject("code could not be parsed".to_string()),
        };

        let root = tree.root_node();
        if root.has_error() {
            return StaticVerdict::Reject("invalid syntax".to_string());
        }

        match self.visit(root, code.as_bytes()) {
            Some(reason) => StaticVerdict::Reject(reason),
            None => StaticVerdict::Accept,
        }
    }

    /// First violation in document order
    fn visit(&self, node: Node, source: &[u8]) -> Option<String> {
        let violation = match node.kind() {
            kind if LEGACY_STATEMENTS.contains(&kind) => legacy_statement(node, source),
            "import_statement" => self.check_import(node, source),
            "import_from_statement" => self.check_import_from(node, source),
            "call" => self.check_call(node, source),
            _ => None,
        };
        if violation.is_some() {
            return violation;
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        children.into_iter().find_map(|child| self.visit(child, source))
    }

    fn check_import(&self, node: Node, source: &[u8]) -> Option<String> {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let name = match child.kind() {
                "dotted_name" => text(child, source),
                "aliased_import" => child.child_by_field_name("name").and_then(|n| text(n, source)),
                _ => None,
            };
            if let Some(module) = name.and_then(|n| self.denied_module(n)) {
                return Some(format!("import of '{}'", module));
            }
        }
        None
    }

    fn check_import_from(&self, node: Node, source: &[u8]) -> Option<String> {
        if let Some(module) = node
            .child_by_field_name("module_name")
            .and_then(|n| text(n, source))
            .and_then(|n| self.denied_module(n))
        {
            return Some(format!("import from '{}'", module));
        }

        let mut cursor = node.walk();
        for child in node.children_by_field_name("name", &mut cursor) {
            let name = match child.kind() {
                "aliased_import" => child.child_by_field_name("name").and_then(|n| text(n, source)),
                _ => text(child, source),
            };
            if let Some(name) = name {
                if self.denied_call(name) {
                    return Some(format!("import of '{}'", name));
                }
            }
        }
        None
    }

    fn check_call(&self, node: Node, source: &[u8]) -> Option<String> {
        let function = node.child_by_field_name("function")?;
        let name = match function.kind() {
            "identifier" => text(function, source),
            "attribute" => function.child_by_field_name("attribute").and_then(|n| text(n, source)),
            _ => None,
        }?;

        if self.denied_call(name) {
            Some(format!("call to '{}'", name))
        } else {
            None
        }
    }

    /// `os.path` checks `os`; relative imports never match
    fn denied_module<'a>(&self, dotted: &'a str) -> Option<&'a str> {
        let top = dotted.split('.').next()?.trim();
        self.denied_modules.iter().any(|m| m == top).then_some(top)
    }

    fn denied_call(&self, name: &str) -> bool {
        self.denied_calls.iter().any(|c| c == name)
    }
}

/// `print x` and `exec code`; a parenthesised argument is a Python 3 call
fn legacy_statement(node: Node, source: &[u8]) -> Option<String> {
    let statement = text(node, source)?;
    let argument = statement
        .trim_start_matches("print")
        .trim_start_matches("exec")
        .trim_start();
    if argument.starts_with('(') {
        None
    } else {
        Some("invalid syntax".to_string())
    }
}

fn text<'a>(node: Node, source: &'a [u8]) -> Option<&'a str> {
    node.utf8_text(source).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(code: &str) -> StaticVerdict {
        StaticPolicy::default().check(code)
    }

    #[test]
    fn test_accepts_plain_function() {
        assert_eq!(check("def add(a, b):\n    return a + b\n"), StaticVerdict::Accept);
        assert_eq!(check(""), StaticVerdict::Accept);
    }

    #[test]
    fn test_accepts_benign_imports() {
        let code = "import math\nimport os.path\nfrom collections import Counter\nprint(math.pi, os.path.join('a', 'b'))\n";
        assert!(check(code).is_accept());
    }

    #[test]
    fn test_rejects_denied_imports() {
        for code in [
            "import subprocess",
            "import sys",
            "import shutil as sh",
            "import json, subprocess",
            "import subprocess.run",
            "from subprocess import run",
            "from shutil import rmtree as r",
        ] {
            assert!(!check(code).is_accept(), "accepted: {}", code);
        }
    }

    #[test]
    fn test_rejects_denied_calls() {
        assert_eq!(
            check("import os\nos.system('ls')\n"),
            StaticVerdict::Reject("call to 'system'".to_string())
        );
        assert!(!check("import os\nos.popen('ls')\n").is_accept());
        assert!(!check("rmtree('/tmp/x')\n").is_accept());
        assert!(!check("m = __import__('subprocess')\n").is_accept());
        assert!(!check("from os import system\n").is_accept());
    }

    #[test]
    fn test_rejects_spawn_and_exec_primitives() {
        for code in [
            "import os\nos.spawnlp(os.P_WAIT, 'ls', 'ls')\n",
            "import os\nos.spawnve(os.P_WAIT, '/bin/ls', ['ls'], {})\n",
            "import os\nos.execvp('ls', ['ls'])\n",
            "import os\nos.execle('/bin/ls', 'ls', {})\n",
            "import os\nos.posix_spawn('/bin/ls', ['ls'], {})\n",
            "import os\nos.posix_spawnp('ls', ['ls'], {})\n",
            "import os\npid = os.fork()\n",
            "import os\nos.forkpty()\n",
            "import asyncio\nasyncio.create_subprocess_shell('ls')\n",
            "import asyncio\nasyncio.create_subprocess_exec('ls')\n",
            "from os import execv\n",
            "import pty\npty.spawn('ls')\n",
            "import multiprocessing\nmultiprocessing.Process(target=print).start()\n",
            "from multiprocessing import Pool\n",
            "import os\nos.removedirs('a/b/c')\n",
        ] {
            assert!(!check(code).is_accept(), "accepted: {}", code);
        }
    }

    #[test]
    fn test_rejects_python2_statements() {
        assert_eq!(
            check("print 'py2 only'\n"),
            StaticVerdict::Reject("invalid syntax".to_string())
        );
        assert!(!check("exec 'x = 1'\n").is_accept());
        assert!(check("print('py3')\n").is_accept());
        assert!(check("exec('x = 1')\n").is_accept());
    }

    #[test]
    fn test_nested_violation_found() {
        let code = "def run():\n    if True:\n        import shutil\n    return 1\n";
        assert_eq!(
            check(code),
            StaticVerdict::Reject("import of 'shutil'".to_string())
        );
    }

    #[test]
    fn test_rejects_invalid_syntax() {
        assert_eq!(
            check("def broken(:\n    pass"),
            StaticVerdict::Reject("invalid syntax".to_string())
        );
    }

    #[test]
    fn test_similar_names_allowed() {
        assert!(check("import system_utils\nsystematic = 1\n").is_accept());
        assert!(check("def popen_count(x):\n    return x\npopen_count(1)\n").is_accept());
    }

    #[test]
    fn test_custom_policy() {
        let policy = StaticPolicy {
            denied_modules: vec!["socket".to_string()],
            denied_calls: vec![],
        };
        assert!(!policy.check("import socket").is_accept());
        assert!(policy.check("import subprocess").is_accept());
    }
}
