use std::collections::{HashMap, HashSet};

/// Looks for a dependency cycle that would be closed by giving `task_id`
/// the edges `deps`, on top of the already registered `edges`.
///
/// Returns the cycle path (`a -> b -> a`) when one exists.
///
/// # Time Complexity
///
/// O(V + E) over the tasks reachable from `task_id`.
pub fn find_cycle(
    edges: &HashMap<String, Vec<String>>,
    task_id: &str,
    deps: &[String],
) -> Option<String> {
    let mut visited = HashSet::new();
    let mut stack = vec![task_id.to_string()];

    for dep in deps {
        if dep == task_id {
            stack.push(dep.clone());
            return Some(format_cycle_path(&stack));
        }
        if !visited.contains(dep) && dfs_cycle(edges, task_id, dep, &mut visited, &mut stack) {
            return Some(format_cycle_path(&stack));
        }
    }

    None
}

fn dfs_cycle(
    edges: &HashMap<String, Vec<String>>,
    root: &str,
    node: &str,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
) -> bool {
    visited.insert(node.to_string());
    stack.push(node.to_string());

    if let Some(dependencies) = edges.get(node) {
        for dep in dependencies {
            if dep == root {
                stack.push(dep.clone());
                return true;
            }

            if !visited.contains(dep) && dfs_cycle(edges, root, dep, visited, stack) {
                return true;
            }
        }
    }

    stack.pop();
    false
}

fn format_cycle_path(stack: &[String]) -> String {
    stack.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(id, deps)| {
                (
                    id.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_no_cycle() {
        let graph = edges(&[("b", &["a"]), ("c", &["b"])]);
        assert_eq!(find_cycle(&graph, "d", &["c".to_string()]), None);
    }

    #[test]
    fn test_self_dependency() {
        let graph = HashMap::new();
        assert_eq!(
            find_cycle(&graph, "a", &["a".to_string()]),
            Some("a -> a".to_string())
        );
    }

    #[test]
    fn test_cycle_through_existing_edges() {
        // b waits on a, c waits on b; giving a a dependency on c closes the loop.
        let graph = edges(&[("b", &["a"]), ("c", &["b"])]);
        assert_eq!(
            find_cycle(&graph, "a", &["c".to_string()]),
            Some("a -> c -> b -> a".to_string())
        );
    }

    #[test]
    fn test_unknown_dependency_is_not_a_cycle() {
        let graph = edges(&[("b", &["a"])]);
        assert_eq!(find_cycle(&graph, "c", &["missing".to_string()]), None);
    }
}
