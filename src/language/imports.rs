use crate::language::{ast::*, visit::qualifiers_in_file};
use tracing::debug;

/// Brings the import list of a generated file in line with what the file
/// actually uses.
///
/// Each path in `required` is added when missing. Afterwards any import
/// whose local name is never used as a `pkg.` qualifier is dropped, except
/// blank (`_`) and dot (`.`) imports which act through side effects or
/// unqualified names. Imports are kept sorted by path.
pub fn reconcile_imports(file: &mut File, required: &[&str]) {
    for path in required {
        let present = file
            .imports
            .iter()
            .any(|import| import.path == *path && import.alias.is_none());
        if !present {
            file.imports.push(ImportSpec::new(*path));
        }
    }

    let used = qualifiers_in_file(file);
    file.imports.retain(|import| {
        let name = import.local_name();
        let keep = name == "_" || name == "." || used.contains(&name);
        if !keep {
            debug!(path = %import.path, "dropping unused import");
        }
        keep
    });

    file.imports.sort_by(|a, b| a.path.cmp(&b.path));
    file.imports.dedup_by(|a, b| a.path == b.path && a.alias == b.alias);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{parser::parse_file, printer::print_file};

    #[test]
    fn adds_required_and_prunes_unused() {
        let mut file = parse_file(
            "package main\nimport (\n\t\"fmt\"\n\t\"os\"\n)\nfunc main() {\n\tfmt.Println(json.Valid(nil))\n}\n",
        )
        .unwrap();
        reconcile_imports(&mut file, &["encoding/json", "net/http"]);
        let paths: Vec<_> = file.imports.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["encoding/json", "fmt"]);
    }

    #[test]
    fn keeps_blank_and_dot_imports() {
        let mut file = parse_file(
            "package main\nimport (\n\t_ \"embed\"\n\t. \"math\"\n)\nfunc main() { _ = Pi }\n",
        )
        .unwrap();
        reconcile_imports(&mut file, &[]);
        assert_eq!(file.imports.len(), 2);
    }

    #[test]
    fn versioned_paths_use_package_name() {
        let mut file = parse_file(
            "package main\nimport (\n\t\"github.com/go-chi/chi/v5\"\n\t\"gopkg.in/yaml.v3\"\n)\nfunc main() { _ = chi.NewRouter(); _ = yaml.Marshal }\n",
        )
        .unwrap();
        reconcile_imports(&mut file, &[]);
        assert_eq!(file.imports.len(), 2);
        assert_eq!(file.imports[0].local_name(), "chi");
        assert_eq!(file.imports[1].local_name(), "yaml");
    }

    #[test]
    fn qualified_types_count_as_uses() {
        let mut file = parse_file(
            "package main\nimport \"net/http\"\nfunc h(w http.ResponseWriter) {}\n",
        )
        .unwrap();
        reconcile_imports(&mut file, &[]);
        let out = print_file(&file).unwrap();
        assert!(out.contains("import \"net/http\""));
    }
}
