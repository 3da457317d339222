// Per-language symbol extraction shared by the graph builder and the tracer

use super::{Ast, AstKind, AstNode, Language};

/// A declared parameter.
#[derive(Debug, Clone)]
pub struct ParamSite<'a> {
    pub name: String,
    pub type_text: Option<String>,
    pub default: Option<&'a AstNode>,
}

/// A call site's callee: the simple name plus whatever qualified it
/// (`utils` in `utils.helper()`, `std` in `std::max`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callee {
    pub name: String,
    pub qualifier: Option<String>,
}

/// Name of a function definition as written. For C++ out-of-line methods this
/// includes the class (`Shape::area`).
pub fn function_name(ast: &Ast, node: &AstNode) -> Option<String> {
    match ast.language {
        Language::C | Language::Cpp => {
            let declarator = function_declarator(node)?;
            let name = declarator.child("declarator")?;
            Some(ast.text(name).to_string())
        }
        _ => node.child("name").map(|n| ast.text(n).to_string()),
    }
}

/// Last segment of a possibly qualified name.
pub fn simple_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name).rsplit('.').next().unwrap_or(name)
}

/// Walk a C/C++ declarator chain down to the `function_declarator`.
pub fn function_declarator(node: &AstNode) -> Option<&AstNode> {
    let mut current = node.child("declarator")?;
    for _ in 0..8 {
        if current.is("function_declarator") {
            return Some(current);
        }
        current = current.child("declarator").or_else(|| current.first_named())?;
    }
    None
}

/// Innermost identifier of a C/C++ declarator (`*p`, `a[3]`, `&r`).
pub fn declarator_name<'a>(ast: &'a Ast, node: &AstNode) -> Option<&'a str> {
    let mut current = node;
    for _ in 0..8 {
        match current.raw_kind {
            "identifier" | "field_identifier" | "qualified_identifier" => return Some(ast.text(current)),
            _ => {
                current = current.child("declarator").or_else(|| current.first_named())?;
            }
        }
    }
    None
}

/// Name contributed by a class, impl block, namespace or module.
pub fn scope_name(ast: &Ast, node: &AstNode) -> Option<String> {
    if node.kind != AstKind::ScopeDefinition {
        return None;
    }
    let name = match (ast.language, node.raw_kind) {
        (Language::Rust, "impl_item") => node.child("type")?,
        _ => node.child("name")?,
    };
    let text = ast.text(name);
    // Strip generic arguments: `Stack<T>` -> `Stack`
    Some(text.split('<').next().unwrap_or(text).trim().to_string())
}

/// Declared parameters of a function definition, in order.
pub fn parameters<'a>(ast: &Ast, node: &'a AstNode) -> Vec<ParamSite<'a>> {
    let list = match ast.language {
        Language::C | Language::Cpp => function_declarator(node).and_then(|d| d.child("parameters")),
        _ => node.child("parameters"),
    };
    let Some(list) = list else {
        return Vec::new();
    };

    let mut params = Vec::new();
    for param in list.named_children() {
        let site = match (ast.language, param.raw_kind) {
            (Language::Python, "identifier") => Some((param, None, None)),
            (Language::Python, "typed_parameter") => param
                .first_named()
                .filter(|n| n.is("identifier"))
                .map(|n| (n, param.child("type"), None)),
            (Language::Python, "default_parameter" | "typed_default_parameter") => param
                .child("name")
                .map(|n| (n, param.child("type"), param.child("value"))),
            (Language::C | Language::Cpp, "parameter_declaration") => {
                let Some(declarator) = param.child("declarator") else {
                    continue;
                };
                declarator_node(declarator).map(|n| (n, param.child("type"), None))
            }
            (Language::Cpp, "optional_parameter_declaration") => param
                .child("declarator")
                .and_then(declarator_node)
                .map(|n| (n, param.child("type"), param.child("default_value"))),
            (Language::Rust, "parameter") => param.child("pattern").map(|n| (n, param.child("type"), None)),
            (Language::Java, "formal_parameter") => param.child("name").map(|n| (n, param.child("type"), None)),
            _ => None,
        };

        if let Some((name, type_node, default)) = site {
            let mut type_text = type_node.map(|t| ast.text(t).to_string());
            // `int a[]` is an array even though the type says int
            if matches!(ast.language, Language::C | Language::Cpp)
                && param.child("declarator").is_some_and(|d| d.is("array_declarator"))
            {
                type_text = Some("[]".to_string());
            }
            params.push(ParamSite {
                name: ast.text(name).trim_start_matches("mut ").to_string(),
                type_text,
                default,
            });
        }
    }
    params
}

fn declarator_node(node: &AstNode) -> Option<&AstNode> {
    let mut current = node;
    for _ in 0..8 {
        if current.is("identifier") {
            return Some(current);
        }
        current = current.child("declarator").or_else(|| current.first_named())?;
    }
    None
}

/// Callee of a call-expression node.
pub fn callee(ast: &Ast, node: &AstNode) -> Option<Callee> {
    if ast.language == Language::Java {
        let name = ast.text(node.child("name")?).to_string();
        let qualifier = node.child("object").map(|o| ast.text(o).to_string());
        return Some(Callee { name, qualifier });
    }

    let function = node.child("function")?;
    let plain = |n: &AstNode| {
        Some(Callee {
            name: ast.text(n).to_string(),
            qualifier: None,
        })
    };

    match function.raw_kind {
        "identifier" => plain(function),
        // python `obj.method()`
        "attribute" => Some(Callee {
            name: ast.text(function.child("attribute")?).to_string(),
            qualifier: function.child("object").map(|o| ast.text(o).to_string()),
        }),
        // c++ `a.size()`, rust `v.len()`
        "field_expression" => {
            let object = function.child("argument").or_else(|| function.child("value"));
            Some(Callee {
                name: ast.text(function.child("field")?).to_string(),
                qualifier: object.map(|o| ast.text(o).to_string()),
            })
        }
        "qualified_identifier" | "scoped_identifier" => {
            let text = ast.text(function);
            match text.rsplit_once("::") {
                Some((qualifier, name)) => Some(Callee {
                    name: name.to_string(),
                    qualifier: Some(qualifier.to_string()),
                }),
                None => plain(function),
            }
        }
        "template_function" | "generic_function" => {
            let inner = function.child("name").or_else(|| function.child("function"))?;
            let text = ast.text(inner);
            let name = text.rsplit("::").next().unwrap_or(text);
            Some(Callee {
                name: name.to_string(),
                qualifier: None,
            })
        }
        _ => None,
    }
}

/// Target identifier and right-hand side of an assignment-like node.
pub fn assignment_parts<'a>(ast: &'a Ast, node: &'a AstNode) -> Option<(&'a str, &'a AstNode)> {
    let (target, value) = match node.raw_kind {
        "assignment" | "augmented_assignment" | "assignment_expression" | "compound_assignment_expr" => {
            (node.child("left")?, node.child("right")?)
        }
        "init_declarator" => (node.child("declarator")?, node.child("value")?),
        "let_declaration" => (node.child("pattern")?, node.child("value")?),
        "variable_declarator" => (node.child("name")?, node.child("value")?),
        _ => return None,
    };
    let name = match target.raw_kind {
        "identifier" => ast.text(target),
        _ if node.is("init_declarator") => declarator_name(ast, target)?,
        _ => return None,
    };
    Some((name, value))
}

/// Variable names read inside an expression. Callee positions, attribute
/// names and keyword-argument names are not reads.
pub fn read_identifiers<'a>(ast: &'a Ast, node: &'a AstNode) -> Vec<&'a str> {
    let mut names = Vec::new();
    node.visit(&mut |n| {
        if n.is("identifier")
            && !matches!(n.field, Some("function" | "name" | "attribute" | "type" | "macro" | "field"))
        {
            let name = ast.text(n);
            if !names.contains(&name) {
                names.push(name);
            }
        }
    });
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarRegistry;

    fn first_function(ast: &Ast) -> &AstNode {
        let mut found = None;
        ast.root.visit(&mut |n| {
            if found.is_none() && n.kind == AstKind::FunctionDefinition {
                found = Some(n);
            }
        });
        found.unwrap()
    }

    #[test]
    fn test_c_function_name_through_pointer() {
        let ast = GrammarRegistry::new()
            .parse(Language::C, "a.c", "char *name(int id, int *out) { return 0; }")
            .unwrap();
        let function = first_function(&ast);
        assert_eq!(function_name(&ast, function).as_deref(), Some("name"));
        let params: Vec<_> = parameters(&ast, function).into_iter().map(|p| p.name).collect();
        assert_eq!(params, vec!["id", "out"]);
    }

    #[test]
    fn test_python_parameters_with_defaults() {
        let ast = GrammarRegistry::new()
            .parse(Language::Python, "a.py", "def f(a, b: int, c=3):\n    pass\n")
            .unwrap();
        let params = parameters(&ast, first_function(&ast));
        assert_eq!(params.len(), 3);
        assert_eq!(params[1].type_text.as_deref(), Some("int"));
        assert!(params[2].default.is_some());
    }

    #[test]
    fn test_callee_qualifiers() {
        let ast = GrammarRegistry::new()
            .parse(Language::Rust, "m.rs", "fn main() { utils::helper(1); v.push(2); }")
            .unwrap();
        let mut callees = Vec::new();
        ast.root.visit(&mut |n| {
            if n.kind == AstKind::CallExpression {
                callees.push(callee(&ast, n).unwrap());
            }
        });
        assert_eq!(callees[0].name, "helper");
        assert_eq!(callees[0].qualifier.as_deref(), Some("utils"));
        assert_eq!(callees[1].name, "push");
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("Shape::area"), "area");
        assert_eq!(simple_name("Utils.helper"), "helper");
        assert_eq!(simple_name("main"), "main");
    }
}
