// Whole-program traces across the supported languages

use flowtrace::{
    resolve, trace, CodeSet, EventKind, FileInput, Language, Pipeline, TraceErrorKind, TraceLimits, TraceStatus,
};

fn run(language: Language, path: &str, source: &str) -> flowtrace::Trace {
    let unit = resolve(FileInput::new(path, source), vec![], language).unwrap();
    trace(&unit, language, &TraceLimits::default()).unwrap()
}

#[test]
fn test_python_functions_and_lists() {
    let source = r#"
def factorial(n):
    if n <= 1:
        return 1
    return n * factorial(n - 1)

values = []
for i in range(1, 5):
    values.append(factorial(i))
print(values)
print(sum(values))
"#;
    let trace = run(Language::Python, "main.py", source);
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.output, vec!["[1, 2, 6, 24]", "33"]);
    assert!(trace.is_contiguous());
    assert!(trace.steps.iter().any(|s| s.event == EventKind::Call && s.function == "factorial"));
    assert!(trace.steps.iter().any(|s| s.event == EventKind::Return));
}

#[test]
fn test_python_handled_exception() {
    let source = r#"
def safe_div(a, b):
    try:
        return a // b
    except ZeroDivisionError:
        return -1

print(safe_div(7, 2))
print(safe_div(1, 0))
"#;
    let trace = run(Language::Python, "main.py", source);
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.output, vec!["3", "-1"]);
}

#[test]
fn test_python_unhandled_exception_keeps_partial_trace() {
    let unit = resolve(
        FileInput::new("main.py", "x = 10\nprint(x)\ny = x / 0\nprint(y)\n"),
        vec![],
        Language::Python,
    )
    .unwrap();
    let err = trace(&unit, Language::Python, &TraceLimits::default()).unwrap_err();
    assert_eq!(err.kind(), Some(TraceErrorKind::RuntimeError));

    let partial = err.partial_trace().unwrap();
    assert_eq!(partial.status, TraceStatus::RuntimeError);
    assert_eq!(partial.output, vec!["10"]);
    let fault = partial.fault.as_ref().unwrap();
    assert!(fault.message.contains("ZeroDivisionError"));
    assert_eq!(fault.line, 3);
    assert!(partial.history("y").is_empty());
}

#[test]
fn test_c_loop_and_printf() {
    let source = r#"#include <stdio.h>

int add(int a, int b) {
    return a + b;
}

int main(void) {
    int total = 0;
    for (int i = 0; i < 4; i++) {
        total = add(total, i);
    }
    printf("total=%d\n", total);
    return 0;
}
"#;
    let trace = run(Language::C, "main.c", source);
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.output, vec!["total=6"]);
    let totals: Vec<i64> = trace.history("total").iter().filter_map(|s| s.value.as_i64()).collect();
    assert_eq!(totals.first(), Some(&0));
    assert_eq!(totals.last(), Some(&6));
}

#[test]
fn test_cpp_vector_and_cout() {
    let source = r#"#include <iostream>
#include <vector>
using namespace std;

int main() {
    vector<int> squares;
    for (int i = 1; i <= 3; i++) {
        squares.push_back(i * i);
    }
    cout << "count " << squares.size() << endl;
    cout << squares[2] << endl;
    return 0;
}
"#;
    let trace = run(Language::Cpp, "main.cpp", source);
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.output, vec!["count 3", "9"]);
}

#[test]
fn test_java_static_methods() {
    let source = r#"public class Main {
    static int fib(int n) {
        if (n < 2) {
            return n;
        }
        return fib(n - 1) + fib(n - 2);
    }

    public static void main(String[] args) {
        int result = fib(7);
        System.out.println("fib=" + result);
    }
}
"#;
    let trace = run(Language::Java, "Main.java", source);
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.output, vec!["fib=13"]);
}

#[test]
fn test_java_uncaught_exception() {
    let source = r#"public class Main {
    public static void main(String[] args) {
        int zero = 0;
        System.out.println("before");
        int boom = 10 / zero;
        System.out.println("after");
    }
}
"#;
    let unit = resolve(FileInput::new("Main.java", source), vec![], Language::Java).unwrap();
    let err = trace(&unit, Language::Java, &TraceLimits::default()).unwrap_err();
    let partial = err.partial_trace().unwrap();
    assert_eq!(partial.status, TraceStatus::RuntimeError);
    assert_eq!(partial.output, vec!["before"]);
}

#[test]
fn test_rust_vec_and_println() {
    let source = r#"fn double(x: i32) -> i32 {
    x * 2
}

fn main() {
    let mut v = Vec::new();
    for i in 0..3 {
        v.push(double(i));
    }
    let total: i32 = v.iter().sum();
    println!("{:?}", v);
    println!("total {}", total);
}
"#;
    let trace = run(Language::Rust, "main.rs", source);
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.output, vec!["[0, 2, 4]", "total 6"]);
}

#[test]
fn test_rust_panic_is_runtime_error() {
    let unit = resolve(
        FileInput::new("main.rs", "fn main() {\n    println!(\"start\");\n    panic!(\"boom\");\n}\n"),
        vec![],
        Language::Rust,
    )
    .unwrap();
    let err = trace(&unit, Language::Rust, &TraceLimits::default()).unwrap_err();
    let partial = err.partial_trace().unwrap();
    assert_eq!(partial.status, TraceStatus::RuntimeError);
    assert_eq!(partial.output, vec!["start"]);
    assert!(partial.fault.as_ref().unwrap().message.contains("boom"));
}

fn fault_of(language: Language, path: &str, source: &str) -> flowtrace::TraceError {
    let unit = resolve(FileInput::new(path, source), vec![], language).unwrap();
    trace(&unit, language, &TraceLimits::default()).unwrap_err()
}

#[test]
fn test_python_oversized_repeat_is_memory_error() {
    let cases = [
        "items = [0] * 1000000000\n",
        "text = 'ab' * 100000000000\n",
        "items = [0, 1] * 9223372036854775807\n",
        "items = [1]\nitems *= 200000\n",
    ];
    for source in cases {
        let source = format!("print('start')\n{}", source);
        let err = fault_of(Language::Python, "main.py", &source);
        assert_eq!(err.kind(), Some(TraceErrorKind::RuntimeError), "{}", source);
        let partial = err.partial_trace().unwrap();
        assert_eq!(partial.output, vec!["start"]);
        assert!(partial.fault.as_ref().unwrap().message.contains("MemoryError"), "{}", source);
        assert!(partial.is_contiguous());
    }
}

#[test]
fn test_python_repeat_within_limits() {
    let trace = run(Language::Python, "main.py", "print([0, 1] * 3)\nprint('ab' * 2)\nprint([1] * -4)\n");
    assert_eq!(trace.output, vec!["[0, 1, 0, 1, 0, 1]", "abab", "[]"]);
}

#[test]
fn test_string_repeat_methods_are_bounded() {
    let java = r#"public class Main {
    public static void main(String[] args) {
        String s = "ab".repeat(2000000000);
    }
}
"#;
    let err = fault_of(Language::Java, "Main.java", java);
    assert_eq!(err.kind(), Some(TraceErrorKind::RuntimeError));
    assert!(err.partial_trace().unwrap().fault.as_ref().unwrap().message.contains("OutOfMemoryError"));

    let rust = "fn main() {\n    let s = \"ab\".repeat(4000000000);\n}\n";
    let err = fault_of(Language::Rust, "main.rs", rust);
    assert_eq!(err.kind(), Some(TraceErrorKind::RuntimeError));
}

#[test]
fn test_c_null_pointer_read_is_segfault() {
    let source = r#"#include <stdio.h>

int main(void) {
    int *p = 0;
    printf("before\n");
    int y = *p;
    printf("%d\n", y);
    return 0;
}
"#;
    let err = fault_of(Language::C, "main.c", source);
    assert_eq!(err.kind(), Some(TraceErrorKind::RuntimeError));
    let partial = err.partial_trace().unwrap();
    assert_eq!(partial.output, vec!["before"]);
    let fault = partial.fault.as_ref().unwrap();
    assert!(fault.message.contains("Segmentation fault"), "{}", fault.message);
    assert_eq!(fault.line, 6);
    assert!(partial.history("y").is_empty());
}

#[test]
fn test_c_arrow_through_null_is_segfault() {
    let source = r#"struct N {
    int v;
};

int main(void) {
    struct N *n = 0;
    int v = n->v;
    return v;
}
"#;
    let err = fault_of(Language::C, "main.c", source);
    let fault = err.partial_trace().unwrap().fault.clone().unwrap();
    assert!(fault.message.contains("Segmentation fault"), "{}", fault.message);
    assert!(!fault.message.contains("attribute"));
}

#[test]
fn test_cpp_null_pointer_write_is_segfault() {
    let source = r#"#include <iostream>
using namespace std;

int main() {
    int *p = nullptr;
    *p = 4;
    cout << "unreachable" << endl;
    return 0;
}
"#;
    let err = fault_of(Language::Cpp, "main.cpp", source);
    let partial = err.partial_trace().unwrap();
    assert!(partial.output.is_empty());
    assert!(partial.fault.as_ref().unwrap().message.contains("Segmentation fault"));
}

#[test]
fn test_cpp_iterator_results_dereference() {
    let source = r#"#include <iostream>
#include <vector>
#include <algorithm>
#include <map>
using namespace std;

int main() {
    vector<int> v = {4, 9, 2};
    cout << *max_element(v.begin(), v.end()) << endl;
    map<string, int> ages;
    ages["ann"] = 31;
    auto it = ages.find("ann");
    if (it != ages.end()) {
        cout << it->second << endl;
    }
    return 0;
}
"#;
    let trace = run(Language::Cpp, "main.cpp", source);
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.output, vec!["9", "31"]);
}

#[test]
fn test_python_set_display() {
    let trace = run(Language::Python, "main.py", "s = {3, 1, 2}\nprint(s)\nprint(set())\nprint([s])\n");
    assert_eq!(trace.output, vec!["{1, 2, 3}", "set()", "[{1, 2, 3}]"]);
}

#[test]
fn test_multi_file_python_trace() {
    let input = CodeSet::new(
        Language::Python,
        FileInput::new("main.py", "from utils import helper\n\nresult = helper(20)\nprint(result)\n"),
        vec![FileInput::new("utils.py", "def helper(x):\n    return x + 1\n")],
    );
    let trace = Pipeline::default().trace_blocking(&input).unwrap();
    assert_eq!(trace.output, vec!["21"]);
    assert!(trace.steps.iter().any(|s| s.file_id == "utils.py"));
}

#[test]
fn test_step_limited_trace_is_prefix_of_full() {
    let source = "total = 0\nfor i in range(20):\n    total = total + i\nprint(total)\n";
    let unit = resolve(FileInput::new("main.py", source), vec![], Language::Python).unwrap();
    let full = trace(&unit, Language::Python, &TraceLimits::default()).unwrap();
    assert_eq!(full.output, vec!["190"]);

    let limits = TraceLimits {
        max_steps: 10,
        ..TraceLimits::default()
    };
    let err = trace(&unit, Language::Python, &limits).unwrap_err();
    assert_eq!(err.kind(), Some(TraceErrorKind::StepLimitExceeded));
    let partial = err.partial_trace().unwrap();
    assert_eq!(partial.steps.len(), 10);
    assert_eq!(partial.steps.as_slice(), &full.steps[..10]);
    for (name, history) in &partial.variables {
        let expected: Vec<_> = full.history(name).iter().filter(|s| s.step_index < 10).cloned().collect();
        assert_eq!(history, &expected);
    }
}

#[test]
fn test_traces_are_deterministic() {
    let source = "import random\nitems = [3, 1, 2]\nitems.sort()\npick = random.randint(1, 100)\nprint(items, pick)\n";
    let first = run(Language::Python, "main.py", source);
    let second = run(Language::Python, "main.py", source);
    assert_eq!(first, second);
    assert!(first.output[0].starts_with("[1, 2, 3]"));
}
