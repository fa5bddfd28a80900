use crate::{
    error::{KompileError, KompileResult},
    language::{
        ast::{Decl, File, FuncDecl, Type},
        errors::SyntaxError,
        parser::parse_file,
    },
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::debug;

/// A parsed input program together with its function symbols.
#[derive(Debug, Clone)]
pub struct Program {
    pub path: PathBuf,
    pub source: String,
    pub file: File,
    pub symbols: SymbolTable,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    functions: BTreeMap<String, FunctionSymbol>,
}

#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    pub name: String,
    pub params: Vec<ParamSymbol>,
    pub variadic: bool,
    pub generic: bool,
    pub decl: FuncDecl,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSymbol {
    /// `None` for unnamed and blank (`_`) parameters.
    pub name: Option<String>,
    pub ty: Type,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Plain,
    CallbackChannel { elem: Type },
}

impl ParamSymbol {
    pub fn is_channel(&self) -> bool {
        matches!(self.kind, ParamKind::CallbackChannel { .. })
    }
}

impl FunctionSymbol {
    fn from_decl(decl: &FuncDecl) -> Self {
        let mut params = Vec::new();
        let mut variadic = false;
        for field in &decl.sig.params {
            if matches!(field.ty, Type::Ellipsis(_)) {
                variadic = true;
            }
            let kind = match field.ty.chan_elem() {
                Some(elem) => ParamKind::CallbackChannel { elem: elem.clone() },
                None => ParamKind::Plain,
            };
            if field.names.is_empty() {
                params.push(ParamSymbol {
                    name: None,
                    ty: field.ty.clone(),
                    kind,
                });
                continue;
            }
            for name in &field.names {
                params.push(ParamSymbol {
                    name: (!name.is_blank()).then(|| name.name.clone()),
                    ty: field.ty.clone(),
                    kind: kind.clone(),
                });
            }
        }
        Self {
            name: decl.name.name.clone(),
            params,
            variadic,
            generic: !decl.type_params.is_empty(),
            decl: decl.clone(),
        }
    }

    pub fn channel_params(&self) -> impl Iterator<Item = &ParamSymbol> {
        self.params.iter().filter(|param| param.is_channel())
    }

    pub fn data_params(&self) -> impl Iterator<Item = &ParamSymbol> {
        self.params.iter().filter(|param| !param.is_channel())
    }
}

impl SymbolTable {
    /// Collects every top-level function that is not a method. A second
    /// declaration of the same name is reported rather than shadowing the
    /// first.
    pub fn build(file: &File) -> Result<Self, Vec<SyntaxError>> {
        let mut functions: BTreeMap<String, FunctionSymbol> = BTreeMap::new();
        let mut errors = Vec::new();
        for decl in &file.decls {
            let Decl::Func(func) = decl else {
                continue;
            };
            if func.is_method() {
                continue;
            }
            // `init` and `_` may legally repeat and can never be launched by name.
            if func.name.name == "init" || func.name.is_blank() {
                continue;
            }
            if let Some(existing) = functions.get(&func.name.name) {
                errors.push(
                    SyntaxError::new(
                        format!("function `{}` redeclared in this file", func.name.name),
                        func.name.span,
                    )
                    .with_label("duplicate declaration")
                    .with_help(format!(
                        "first declared at byte offset {}",
                        existing.decl.name.span.start
                    )),
                );
                continue;
            }
            debug!(function = %func.name.name, "registered function symbol");
            functions.insert(func.name.name.clone(), FunctionSymbol::from_decl(func));
        }
        if errors.is_empty() {
            Ok(Self { functions })
        } else {
            Err(errors)
        }
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.functions.values()
    }
}

/// Parses `source` and builds its symbol table.
pub fn load(path: &Path, source: &str) -> KompileResult<Program> {
    let parse_error = |errors| KompileError::Parse {
        path: path.to_path_buf(),
        text: source.to_string(),
        errors,
    };
    let file = parse_file(source).map_err(|errs| parse_error(errs.errors))?;
    if file.package.name != "main" {
        return Err(parse_error(vec![SyntaxError::new(
            format!("expected package main, found package {}", file.package.name),
            file.package.span,
        )
        .with_help("only executable programs can be split into services")]));
    }
    let symbols = SymbolTable::build(&file).map_err(parse_error)?;
    Ok(Program {
        path: path.to_path_buf(),
        source: source.to_string(),
        file,
        symbols,
    })
}

/// Reads and loads the program at `path`.
pub fn load_path(path: &Path) -> KompileResult<Program> {
    let source = std::fs::read_to_string(path).map_err(|error| KompileError::io(path, error))?;
    load(path, &source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(source: &str) -> KompileResult<Program> {
        load(Path::new("main.go"), source)
    }

    #[test]
    fn classifies_parameters() {
        let program = program(
            "package main\nfunc resize(data []byte, result chan<- string, _ int) {}\nfunc main() {}\n",
        )
        .unwrap();
        let resize = program.symbols.get("resize").unwrap();
        assert_eq!(resize.params.len(), 3);
        assert_eq!(resize.params[0].kind, ParamKind::Plain);
        assert!(matches!(
            &resize.params[1].kind,
            ParamKind::CallbackChannel { elem } if elem.is_named("string")
        ));
        assert_eq!(resize.params[2].name, None);
        assert_eq!(resize.channel_params().count(), 1);
        assert_eq!(resize.data_params().count(), 2);
    }

    #[test]
    fn skips_methods() {
        let program =
            program("package main\ntype T struct{}\nfunc (T) run() {}\nfunc main() {}\n").unwrap();
        assert!(!program.symbols.contains("run"));
        assert_eq!(program.symbols.len(), 1);
    }

    #[test]
    fn duplicate_functions_are_parse_errors() {
        let err = program("package main\nfunc a() {}\nfunc a() {}\nfunc main() {}\n").unwrap_err();
        match err {
            KompileError::Parse { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].message.contains("redeclared"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn multiple_init_functions_are_allowed() {
        assert!(program("package main\nfunc init() {}\nfunc init() {}\nfunc main() {}\n").is_ok());
    }

    #[test]
    fn rejects_library_packages() {
        assert!(matches!(
            program("package util\nfunc F() {}\n"),
            Err(KompileError::Parse { .. })
        ));
    }

    #[test]
    fn syntax_errors_carry_source() {
        match program("package main\nfunc main() {\n").unwrap_err() {
            KompileError::Parse { text, errors, .. } => {
                assert!(text.starts_with("package main"));
                assert!(!errors.is_empty());
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
