use std::{any::Any, cell::Cell, cell::RefCell, rc::Rc, time::Duration};

use hostscript::{
    ast::{FunctionSignature, IdentifierExpression},
    compilation::{CompilationContext, CompileErrorKind, Symbol},
    interpreter::{monitor::DEFAULT_MAX_CALL_DEPTH, RuntimeErrorKind},
    registry::{ClassDef, HostMember},
    span::Position,
    value::HostObject,
    CompiledExpression, GlobalContext, HostRegistry, Limits, RuntimeContext, RuntimeError, Script,
    ScriptType, TypeSystem, Value,
};
use pretty_assertions::assert_eq;

fn standard_types() -> Rc<dyn TypeSystem> {
    Rc::new(HostRegistry::new())
}

fn main_entry() -> FunctionSignature {
    FunctionSignature::new("Main", ScriptType::Void, &[])
}

fn run(
    source: &str,
    types: Rc<dyn TypeSystem>,
    setup: impl FnOnce(&mut RuntimeContext),
) -> (Result<(), RuntimeError>, String) {
    let script = Script::compile_with_entry_points(source, types, &[main_entry()])
        .expect("Compile should work on valid program");
    let output = Rc::new(RefCell::new(Vec::new()));
    let mut context = script.new_context().with_output(output.clone());
    setup(&mut context);

    let result = script
        .prepare(&mut context)
        .and_then(|()| script.call("Main", &mut context, &[]).map(|_| ()));
    let output = String::from_utf8(output.take()).expect("Output should be valid UTF-8");
    (result, output)
}

fn test_valid_program(source: &str, expected_output: &str) {
    let (result, output) = run(source, standard_types(), |_| {});
    result.expect("Interpret should work on valid program");
    assert_eq!(output, expected_output);
}

fn runtime_error(source: &str, limits: Limits) -> RuntimeErrorKind {
    let script = Script::compile(source, standard_types()).expect("Compile should work");
    let mut context = script
        .new_context()
        .with_output(Rc::new(RefCell::new(std::io::sink())))
        .with_limits(limits);
    script
        .prepare(&mut context)
        .and_then(|()| script.call("Main", &mut context, &[]))
        .expect_err("Program should fail at runtime")
        .kind
}

#[test]
fn test_fib() {
    let source = r#"
    int Fib(int n) {
        if (n <= 1) { return n; }
        return Fib(n - 1) + Fib(n - 2);
    }

    void Main() {
        for (int i = 0; i < 10; i++) {
            Debug.Log(Fib(i));
        }
    }
    "#;
    test_valid_program(source, "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n");
}

#[test]
fn test_loops_break_and_continue() {
    let source = r#"
    void Main() {
        for (int i = 0; i < 4; i++) {
            if (i == 2) { continue; }
            int j = 0;
            while (true) {
                if (j == 1) { break; }
                Debug.Log($"{i},{j}");
                j++;
            }
        }
    }
    "#;
    test_valid_program(source, "0,0\n1,0\n3,0\n");
}

#[test]
fn test_return_from_foreach() {
    let source = r#"
    int FirstAbove(List<int> values, int limit) {
        foreach (int v in values) {
            if (v > limit) { return v; }
        }
        return -1;
    }

    void Main() {
        List<int> values = new List<int>() { 5, 20, 30 };
        Debug.Log(FirstAbove(values, 10));
        Debug.Log(FirstAbove(values, 50));
    }
    "#;
    test_valid_program(source, "20\n-1\n");
}

#[test]
fn test_switch_sections() {
    let source = r#"
    void Main() {
        for (int i = 0; i < 5; i++) {
            string label = "";
            switch (i) {
                case 1:
                    label = "one";
                    break;
                case 3:
                case 4:
                    label = "few";
                    break;
                default:
                    label = i.ToString();
                    break;
            }
            if (i == 4) { break; }
            Debug.Log(label);
        }
    }
    "#;
    test_valid_program(source, "0\none\n2\nfew\n");
}

#[test]
fn test_arithmetic_and_compound_assignment() {
    let source = r#"
    void Main() {
        int total = 0;
        int i = 10;
        while (i > 0) {
            total += i;
            i -= 3;
        }
        Debug.Log(total);

        string s = "a";
        s += "b";
        Debug.Log(s);
        Debug.Log(7 / 2);
        Debug.Log(-7 / 2);
        Debug.Log(7 % 3);
        Debug.Log(2 ^ 10);
        Debug.Log(1 + 2 * 3);
    }
    "#;
    test_valid_program(source, "22\nab\n3\n-3\n1\n1024\n7\n");
}

#[test]
fn test_short_circuit() {
    let source = r#"
    int calls = 0;

    bool Touch() {
        calls++;
        return true;
    }

    void Main() {
        if (false && Touch()) { Debug.Log("unreachable"); }
        Debug.Log(calls);
        Debug.Log(true && false ? "yes" : "no");
        Debug.Log(true || Touch());
        Debug.Log(Touch() || false ? calls : -1);
    }
    "#;
    test_valid_program(source, "0\nno\ntrue\n1\n");
}

#[test]
fn test_casts_and_widening() {
    let source = r#"
    void Main() {
        Debug.Log((int)3.75);
        long big = 5000000000;
        Debug.Log(big);
        object boxed = "hi";
        string s = (string)boxed;
        Debug.Log(s.ToUpper());
        Debug.Log((float)1 / 4);
        double d = 3;
        Debug.Log(d / 2);
    }
    "#;
    test_valid_program(source, "3\n5000000000\nHI\n0.25\n1.5\n");
}

#[test]
fn test_interpolation_formatting() {
    let source = r#"
    void Main() {
        double price = 3.14159;
        int count = 3;
        Debug.Log($"{price:F2}");
        Debug.Log($"{{{count}}}");
        Debug.Log($"[{count,4}]");
        Debug.Log($"[{count,-4}]");
        Debug.Log(string.Format("{0} of {1}", count, 10));
    }
    "#;
    test_valid_program(source, "3.14\n{3}\n[   3]\n[3   ]\n3 of 10\n");
}

#[test]
fn test_math_facility() {
    let source = r#"
    void Main() {
        Debug.Log(Math.Max(3, 9));
        Debug.Log(Math.Sqrt(16));
        Debug.Log(Math.Abs(-4));
        Debug.Log(Math.Min(2.5, 1));
    }
    "#;
    test_valid_program(source, "9\n4\n4\n1\n");
}

#[test]
fn test_list_members() {
    let source = r#"
    void Main() {
        List<string> names = new List<string>() { "a", "b" };
        names.Add("c");
        names[0] = "z";
        names.RemoveAt(1);
        Debug.Log(names.Count);
        Debug.Log(names);
        Debug.Log(names.Contains("c"));
    }
    "#;
    test_valid_program(source, "2\n[z, c]\ntrue\n");
}

#[test]
fn test_divide_by_zero() {
    let source = "void Main() { int zero = 0; Debug.Log(1 / zero); }";
    assert!(matches!(
        runtime_error(source, Limits::default()),
        RuntimeErrorKind::DivideByZero
    ));
}

#[test]
fn test_index_out_of_range() {
    let source = "void Main() { List<int> xs = new List<int>() { 1 }; Debug.Log(xs[3]); }";
    assert!(matches!(
        runtime_error(source, Limits::default()),
        RuntimeErrorKind::IndexOutOfRange { index: 3, length: 1 }
    ));
}

#[test]
fn test_step_limit() {
    let source = "void Main() { while (true) { } }";
    assert!(matches!(
        runtime_error(source, Limits::default().with_max_steps(100)),
        RuntimeErrorKind::StepLimitExceeded(100)
    ));
}

#[test]
fn test_call_depth_limit() {
    let source = "int Down(int n) { return Down(n + 1); } void Main() { Down(0); }";
    assert!(matches!(
        runtime_error(source, Limits::default().with_max_call_depth(32)),
        RuntimeErrorKind::CallDepthExceeded(32)
    ));
}

#[test]
fn test_default_call_depth_fails_cleanly() {
    let source = "int Down(int n) { return Down(n + 1); } void Main() { Down(0); }";
    assert!(matches!(
        runtime_error(source, Limits::default()),
        RuntimeErrorKind::CallDepthExceeded(DEFAULT_MAX_CALL_DEPTH)
    ));

    let nested = "int Sum(int n) { if (n == 0) { return 0; } return n + Sum(n - 1); } \
                  void Main() { Debug.Log(Sum(60)); }";
    test_valid_program(nested, "1830\n");
}

#[test]
fn test_deep_source_is_rejected_before_running() {
    let parens = format!(
        "void Main() {{ int x = {}1{}; }}",
        "(".repeat(10_000),
        ")".repeat(10_000)
    );
    let error = Script::compile(&parens, standard_types()).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::NestingTooDeep(_)));

    let chain = format!("void Main() {{ int x = {}; }}", vec!["1"; 5_000].join(" + "));
    let error = Script::compile(&chain, standard_types()).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::NestingTooDeep(_)));
}

#[test]
fn test_int_min_literal() {
    let source = r#"
    void Main() {
        int x = -2147483648;
        long y = 2147483648;
        Debug.Log(x);
        Debug.Log(y + x);
    }
    "#;
    test_valid_program(source, "-2147483648\n0\n");
}

#[test]
fn test_function_overloads() {
    let source = r#"
    string Show(int n) { return "int " + n; }
    string Show(string s) { return "string " + s; }
    string Show(double d) { return "double " + d; }
    string Show(int a, int b) { return "pair " + (a + b); }
    void Main() {
        Debug.Log(Show(1));
        Debug.Log(Show("x"));
        Debug.Log(Show(2.5));
        Debug.Log(Show(1L));
        Debug.Log(Show(2, 3));
    }
    "#;
    test_valid_program(source, "int 1\nstring x\ndouble 2.5\ndouble 1\npair 5\n");
}

#[test]
fn test_scripts_share_globals_but_not_members() {
    let first = Script::compile(
        "global int shared = 1; int mine = 10; \
         void Bump() { shared++; mine++; } int Mine() { return mine; }",
        standard_types(),
    )
    .unwrap();
    let second = Script::compile(
        "global int shared; int mine = 20; int Read() { return shared * 100 + mine; }",
        standard_types(),
    )
    .unwrap();

    let globals = GlobalContext::new(standard_types());
    let mut a = first.new_context_in(&globals);
    let mut b = second.new_context_in(&globals);
    first.prepare(&mut a).unwrap();
    second.prepare(&mut b).unwrap();

    first.call("Bump", &mut a, &[]).unwrap();
    assert_eq!(second.call_as::<i32>("Read", &mut b, &[]).unwrap(), 220);
    assert_eq!(first.call_as::<i32>("Mine", &mut a, &[]).unwrap(), 11);
    assert_eq!(b.get_global_as::<i32>("shared").unwrap(), 2);
    assert!(b.member("mine").is_some_and(|binding| matches!(binding.value, Value::Int(20))));
}

#[test]
fn test_arrays() {
    let source = r#"
    void Main() {
        int[] squares = new int[4];
        for (int i = 0; i < squares.Length; i++) { squares[i] = i * i; }
        Debug.Log(squares);
        string[] names = new string[] { "a", "b" };
        names[1] += "!";
        foreach (string name in names) { Debug.Log(name); }
        int[][] grid = new int[2][];
        grid[0] = new int[] { 7 };
        Debug.Log(grid[0][0]);
        Debug.Log(grid[1] == null);
    }
    "#;
    test_valid_program(source, "[0, 1, 4, 9]\na\nb!\n7\ntrue\n");
}

#[test]
fn test_array_bounds_and_length() {
    let source = "void Main() { int[] xs = new int[2]; xs[2] = 1; }";
    assert!(matches!(
        runtime_error(source, Limits::default()),
        RuntimeErrorKind::IndexOutOfRange { index: 2, length: 2 }
    ));
    let source = "void Main() { int n = -1; int[] xs = new int[n]; }";
    assert!(matches!(
        runtime_error(source, Limits::default()),
        RuntimeErrorKind::NegativeLength(-1)
    ));
}

#[test]
fn test_dictionaries() {
    let source = r#"
    void Main() {
        Dictionary<string, int> ages = new Dictionary<string, int>() { { "ann", 30 } };
        ages.Add("bob", 41);
        ages["ann"] += 1;
        ages["cy"] = 5;
        Debug.Log(ages.Count);
        Debug.Log(ages["ann"]);
        Debug.Log(ages.ContainsKey("bob") && !ages.ContainsKey("dee"));
        Debug.Log(ages.Remove("bob"));
        foreach (string name in ages) { Debug.Log(name); }
        Debug.Log(ages.Values);
    }
    "#;
    test_valid_program(source, "3\n31\ntrue\ntrue\nann\ncy\n[31, 5]\n");
}

#[test]
fn test_dictionary_errors() {
    let missing = r#"void Main() { Dictionary<string, int> d = new Dictionary<string, int>(); int x = d["k"]; }"#;
    assert!(matches!(
        runtime_error(missing, Limits::default()),
        RuntimeErrorKind::KeyNotFound(key) if key == "k"
    ));
    let duplicate = r#"void Main() { Dictionary<int, int> d = new Dictionary<int, int>(); d.Add(1, 1); d.Add(1, 2); }"#;
    assert!(matches!(
        runtime_error(duplicate, Limits::default()),
        RuntimeErrorKind::DuplicateKey(_)
    ));
}

#[test]
fn test_queues_and_stacks() {
    let source = r#"
    void Main() {
        Queue<int> pending = new Queue<int>();
        pending.Enqueue(1);
        pending.Enqueue(2);
        Stack<string> undo = new Stack<string>();
        undo.Push("a");
        undo.Push("b");
        foreach (string step in undo) { Debug.Log(step); }
        Debug.Log(pending.Dequeue() + pending.Peek());
        Debug.Log(undo.Pop() + undo.Count);
    }
    "#;
    test_valid_program(source, "b\na\n3\nb1\n");

    let empty = "void Main() { Stack<int> s = new Stack<int>(); s.Pop(); }";
    assert!(matches!(
        runtime_error(empty, Limits::default()),
        RuntimeErrorKind::EmptyCollection(_)
    ));
}

#[test]
fn test_deadline() {
    let source = "void Main() { while (true) { } }";
    assert!(matches!(
        runtime_error(source, Limits::default().with_timeout(Duration::from_millis(20))),
        RuntimeErrorKind::DeadlineExceeded
    ));
}

#[test]
fn test_contexts_are_independent() {
    let source = r#"
    int hits = 0;
    void Hit() { hits++; }
    int Hits() { return hits; }
    "#;
    let script = Script::compile(source, standard_types()).unwrap();
    let mut first = script.new_context();
    let mut second = script.new_context();
    script.prepare(&mut first).unwrap();
    script.prepare(&mut second).unwrap();

    script.call("Hit", &mut first, &[]).unwrap();
    script.call("Hit", &mut first, &[]).unwrap();
    script.call("Hit", &mut second, &[]).unwrap();

    assert_eq!(script.call_as::<i32>("Hits", &mut first, &[]).unwrap(), 2);
    assert_eq!(script.call_as::<i32>("Hits", &mut second, &[]).unwrap(), 1);
}

#[derive(Debug)]
struct Player {
    name: String,
    health: Cell<i32>,
}

impl HostObject for Player {
    fn class_name(&self) -> &str {
        "Player"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn player(value: &Value) -> Result<&Player, RuntimeErrorKind> {
    match value {
        Value::Host(object) => object
            .as_any()
            .downcast_ref::<Player>()
            .ok_or_else(|| RuntimeErrorKind::Host("not a player".to_string())),
        _ => Err(RuntimeErrorKind::Host("not a player".to_string())),
    }
}

fn player_types() -> Rc<dyn TypeSystem> {
    let mut registry = HostRegistry::new();
    registry.register_class(ClassDef::new("Player")).unwrap();
    let class = ScriptType::class("Player");

    registry.register_instance(
        &class,
        HostMember::property("Name", ScriptType::String, |_, args| {
            Ok(Value::string(&player(&args[0])?.name))
        }),
    );
    registry.register_instance(
        &class,
        HostMember::property("Health", ScriptType::Int, |_, args| {
            Ok(Value::Int(player(&args[0])?.health.get()))
        }),
    );
    registry.register_instance(
        &class,
        HostMember::method("Heal", vec![ScriptType::Int], ScriptType::Void, |_, args| {
            let target = player(&args[0])?;
            target.health.set(target.health.get() + args[1].as_int()?);
            Ok(Value::Null)
        }),
    );
    registry.register_constructor("Player", vec![ScriptType::String], |_, args| {
        let name = args[0].as_str().unwrap_or_default().to_string();
        Ok(Value::Host(Rc::new(Player {
            name,
            health: Cell::new(10),
        })))
    });

    Rc::new(registry)
}

#[test]
fn test_host_objects() {
    let source = r#"
    extern Player hero;

    void Main() {
        hero.Heal(5);
        Debug.Log(hero.Name + " " + hero.Health);
        Player other = new Player("Bo");
        Debug.Log($"{other.Name} {other.Health}");
    }
    "#;
    let hero = Rc::new(Player {
        name: "Ann".to_string(),
        health: Cell::new(10),
    });
    let shared = hero.clone();

    let (result, output) = run(source, player_types(), |context| {
        context
            .define_global("hero", ScriptType::class("Player"), Value::Host(shared))
            .unwrap();
    });
    result.unwrap();
    assert_eq!(output, "Ann 15\nBo 10\n");
    assert_eq!(hero.health.get(), 15);
}

#[test]
fn test_missing_extern() {
    let (result, _) = run("extern Player hero; void Main() { }", player_types(), |_| {});
    assert!(matches!(
        result.unwrap_err().kind,
        RuntimeErrorKind::ExternMissing { .. }
    ));
}

#[test]
fn test_null_strings() {
    let source = r#"
    extern string name;

    int Size() { return name.Length; }

    void Main() {
        Debug.Log("[" + name + "]");
        Debug.Log(string.IsNullOrEmpty(name));
        Debug.Log(name == null);
    }
    "#;
    let script = Script::compile(source, standard_types()).unwrap();
    let output = Rc::new(RefCell::new(Vec::new()));
    let mut context = script.new_context().with_output(output.clone());
    context
        .define_global("name", ScriptType::String, Value::Null)
        .unwrap();
    script.prepare(&mut context).unwrap();

    script.call("Main", &mut context, &[]).unwrap();
    assert_eq!(String::from_utf8(output.take()).unwrap(), "[]\ntrue\ntrue\n");

    let error = script.call("Size", &mut context, &[]).unwrap_err();
    assert!(matches!(error.kind, RuntimeErrorKind::NullValue(_)));

    let error = Script::compile("void Main() { int x = null; }", standard_types()).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::TypeMismatch { .. }));
}

#[test]
fn test_compile_errors_are_reported() {
    let error = Script::compile("void Main() {\n    total = 3;\n}", standard_types()).unwrap_err();
    assert!(error.to_string().contains("used without declaring"));
    assert_eq!(error.position.line, 2);

    let error =
        Script::compile_with_entry_points("void Start() { }", standard_types(), &[main_entry()])
            .unwrap_err();
    assert_eq!(error.kind, CompileErrorKind::MissingFunction("void Main()".to_string()));
}

#[test]
fn test_host_bound_identifiers() {
    let types = standard_types();
    let mut compilation = CompilationContext::new();
    compilation
        .declare("score", Symbol::Variable(ScriptType::Int), Position::default())
        .unwrap();
    let score = IdentifierExpression::new("score", Position::default(), &compilation).unwrap();

    let mut context = RuntimeContext::new(types);
    context
        .define_global("score", ScriptType::Int, Value::Int(4))
        .unwrap();
    assert_eq!(score.get_as::<i32>(&context).unwrap(), 4);

    score.set_as(&mut context, 9).unwrap();
    assert_eq!(context.get_global_as::<i64>("score").unwrap(), 9);

    let error = score.set_as(&mut context, "nine".to_string()).unwrap_err();
    assert!(matches!(error.kind, RuntimeErrorKind::TypeMismatch { .. }));
    assert_eq!(score.get_as::<i32>(&context).unwrap(), 9);
    assert!(score.get_as::<String>(&context).is_err());
    assert!(score.set(&mut context, Value::Null).is_err());

    compilation
        .declare("title", Symbol::Variable(ScriptType::String), Position::default())
        .unwrap();
    let title = IdentifierExpression::new("title", Position::default(), &compilation).unwrap();
    context
        .define_global("title", ScriptType::String, Value::string("x"))
        .unwrap();
    title.set(&mut context, Value::Null).unwrap();
    assert_eq!(title.get_as::<Option<String>>(&context).unwrap(), None);

    assert!(IdentifierExpression::new("missing", Position::default(), &compilation).is_err());
}

#[test]
fn test_compiled_expression_over_globals() {
    let types = standard_types();
    let expression = CompiledExpression::compile(
        "level >= 3 && name != \"guest\"",
        types,
        &[("level", ScriptType::Int), ("name", ScriptType::String)],
    )
    .unwrap();
    assert_eq!(expression.ty(), &ScriptType::Bool);

    let mut context = expression.new_context();
    context.define_global("level", ScriptType::Int, Value::Int(5)).unwrap();
    context
        .define_global("name", ScriptType::String, Value::string("ada"))
        .unwrap();
    assert!(expression.evaluate_as::<bool>(&mut context).unwrap());

    context
        .define_global("name", ScriptType::String, Value::string("guest"))
        .unwrap();
    assert!(!expression.evaluate_as::<bool>(&mut context).unwrap());
}
