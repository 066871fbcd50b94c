use std::rc::Rc;

use approx::assert_relative_eq;
use modelica_mx::ast::{
    BinOp, Causality, ComponentRef, ConstraintDecl, Equation, Expr, FlatSource, FunctionDecl,
    FunctionVariable, ModelDescription, OptimizationDescription, RecordDecl, RecordField,
    RelationKind, Statement, TimePoint, TypeDecl, TypeRef, UnOp, VariableDecl, Variability,
    BaseType,
};
use modelica_mx::{
    transfer_model, transfer_optimization_problem, TransferError, TransferOptions, VariableKind, MX,
};

fn inline() -> TransferOptions {
    TransferOptions::default()
}

fn without_inlining() -> TransferOptions {
    TransferOptions::without_inlining()
}

fn transfer(model: ModelDescription, options: &TransferOptions) -> modelica_mx::Model {
    let name = model.name.clone();
    transfer_model(&name, &FlatSource::from_model(model), options).unwrap()
}

fn kind_names(model: &modelica_mx::Model, kind: VariableKind) -> Vec<String> {
    model
        .variables_by_kind(kind)
        .iter()
        .map(|v| v.borrow().name().to_string())
        .collect()
}

#[test]
fn simple_equation_residual() {
    let mut desc = ModelDescription::new("AtomicModelSimpleEquation");
    desc.variables.push(VariableDecl::real("x1"));
    desc.equations
        .push(Equation::simple(Expr::der("x1"), Expr::name("x1")));
    let model = transfer(desc, &inline());
    assert_eq!(model.dae_residual().to_string(), "(x1-der_x1)");
    assert_eq!(kind_names(&model, VariableKind::Differentiated), ["x1"]);
    assert_eq!(kind_names(&model, VariableKind::Derivative), ["der_x1"]);
}

#[test]
fn simple_initial_equation_residual() {
    let mut desc = ModelDescription::new("AtomicModelSimpleInitialEquation");
    desc.variables.push(VariableDecl::real("x1"));
    desc.equations
        .push(Equation::simple(Expr::der("x1"), Expr::name("x1")));
    desc.initial_equations
        .push(Equation::simple(Expr::name("x1"), Expr::num(1.0)));
    let model = transfer(desc, &inline());
    assert_eq!(
        model.initial_residual().to_string(),
        "(Const<1>(scalar)-x1)"
    );
}

#[test]
fn alias_variables_resolve_to_their_representative() {
    let mut desc = ModelDescription::new("atomicModelAlias");
    desc.variables.push(VariableDecl::real("y"));
    desc.variables
        .push(VariableDecl::real("x").with_alias("y", false));
    desc.variables
        .push(VariableDecl::real("z").with_alias("y", true));
    desc.variables.push(VariableDecl::real("w"));
    desc.equations
        .push(Equation::simple(Expr::der("y"), Expr::name("y")));
    desc.equations
        .push(Equation::simple(Expr::name("w"), Expr::name("z")));
    let model = transfer(desc, &inline());

    assert!(!model.variable_by_name("x").unwrap().borrow().is_negated());
    assert!(model.variable_by_name("z").unwrap().borrow().is_negated());
    assert_eq!(
        model.variable_by_name("x").unwrap().borrow().to_string(),
        "x, alias: y, declaredType : Real"
    );
    assert_eq!(
        model.model_variable_by_name("x").unwrap().borrow().to_string(),
        "y, declaredType : Real"
    );
    assert_eq!(
        model.variable_by_name("y").unwrap().borrow().to_string(),
        "y, declaredType : Real"
    );
    assert_eq!(
        model.model_variable_by_name("z").unwrap().borrow().to_string(),
        "y, declaredType : Real"
    );
    // the two lookups land on the same declared type instance
    assert!(Rc::ptr_eq(
        model.model_variable_by_name("x").unwrap().borrow().declared_type(),
        model.model_variable_by_name("z").unwrap().borrow().declared_type(),
    ));
    // a negated alias lowers to the negated representative
    assert_eq!(
        model.dae_residual().to_string(),
        "vertcat((y-der_y),((-y)-w))"
    );
}

#[test]
fn attributes_transfer_onto_the_differentiated_variable() {
    let mut desc = ModelDescription::new("AtomicModelAttributes");
    desc.variables.push(
        VariableDecl::real("x1")
            .with_attribute("unit", Expr::Str("kg".to_string()))
            .with_attribute("quantity", Expr::Str("kg".to_string()))
            .with_attribute("displayUnit", Expr::Str("kg".to_string()))
            .with_attribute("min", Expr::num(0.0))
            .with_attribute("max", Expr::num(100.0))
            .with_attribute("start", Expr::num(0.0005))
            .with_attribute("fixed", Expr::Bool(true))
            .with_attribute("nominal", Expr::num(0.1))
            .with_attribute("comment", Expr::Str("I am x1's comment".to_string())),
    );
    desc.equations
        .push(Equation::simple(Expr::der("x1"), Expr::name("x1")));
    let model = transfer(desc, &inline());
    let diffs = model.variables_by_kind(VariableKind::Differentiated);
    let x1 = diffs[0].borrow();
    assert_eq!(x1.attribute("unit"), Some(&MX::sym("kg")));
    assert_eq!(x1.attribute("quantity"), Some(&MX::sym("kg")));
    assert_eq!(x1.attribute("displayUnit"), Some(&MX::sym("kg")));
    assert_eq!(x1.attribute("min").unwrap().to_string(), "Const<0>(scalar)");
    assert_eq!(
        x1.attribute("max").unwrap().to_string(),
        "Const<100>(scalar)"
    );
    assert_eq!(
        x1.attribute("start").unwrap().to_string(),
        "Const<0.0005>(scalar)"
    );
    assert_eq!(
        x1.attribute("fixed").unwrap().to_string(),
        "Const<1>(scalar)"
    );
    assert_eq!(
        x1.attribute("nominal").unwrap().to_string(),
        "Const<0.1>(scalar)"
    );
    assert_eq!(x1.attribute("comment"), Some(&MX::sym("I am x1's comment")));
}

#[test]
fn declared_types_intern_and_print() {
    let mut desc = ModelDescription::new("AtomicModelDerivedRealTypeVoltage");
    desc.types.push(TypeDecl {
        name: "Voltage".to_string(),
        base: BaseType::Real,
        attributes: vec![
            (
                "quantity".to_string(),
                Expr::Str("ElectricalPotential".to_string()),
            ),
            ("unit".to_string(), Expr::Str("V".to_string())),
        ],
    });
    desc.variables
        .push(VariableDecl::new("v1", TypeRef::Declared("Voltage".to_string())));
    desc.variables.push(VariableDecl::real("v2"));
    desc.equations
        .push(Equation::simple(Expr::der("v1"), Expr::name("v1")));
    desc.equations
        .push(Equation::simple(Expr::der("v2"), Expr::name("v2")));
    let model = transfer(desc, &inline());

    assert_eq!(
        model.variable_type_by_name("Voltage").unwrap().to_string(),
        "Type name: Voltage, base type: Real, attributes:\
         \n\tquantity = ElectricalPotential\
         \n\tunit = V"
    );
    let diffs = model.variables_by_kind(VariableKind::Differentiated);
    assert!(Rc::ptr_eq(
        diffs[0].borrow().declared_type(),
        &model.variable_type_by_name("Voltage").unwrap()
    ));
    assert!(Rc::ptr_eq(
        diffs[1].borrow().declared_type(),
        &model.variable_type_by_name("Real").unwrap()
    ));
}

#[test]
fn equal_type_declarations_collapse_to_one_symbol() {
    let mut desc = ModelDescription::new("TypeInterning");
    let attrs = vec![("quantity".to_string(), Expr::Str("steps".to_string()))];
    desc.types.push(TypeDecl {
        name: "Steps".to_string(),
        base: BaseType::Integer,
        attributes: attrs.clone(),
    });
    desc.types.push(TypeDecl {
        name: "MoreSteps".to_string(),
        base: BaseType::Integer,
        attributes: attrs,
    });
    let model = transfer(desc, &inline());
    assert!(Rc::ptr_eq(
        &model.variable_type_by_name("Steps").unwrap(),
        &model.variable_type_by_name("MoreSteps").unwrap()
    ));
    assert_eq!(
        model.variable_type_by_name("Steps").unwrap().to_string(),
        "Type name: Steps, base type: Integer, attributes:\n\tquantity = steps"
    );
}

#[test]
fn parameter_bindings_classify_and_evaluate() {
    let mut desc = ModelDescription::new("atomicModelDependentParameter");
    desc.variables.push(
        VariableDecl::real("p1")
            .with_variability(Variability::Parameter)
            .with_binding(Expr::num(10.0)),
    );
    desc.variables.push(
        VariableDecl::real("p2")
            .with_variability(Variability::Parameter)
            .with_binding(Expr::binary(BinOp::Mul, Expr::num(2.0), Expr::name("p1"))),
    );
    desc.variables.push(
        VariableDecl::real("p3")
            .with_variability(Variability::Parameter)
            .with_binding(Expr::name("p2")),
    );
    desc.variables.push(
        VariableDecl::real("p4")
            .with_variability(Variability::Parameter)
            .with_binding(Expr::binary(BinOp::Mul, Expr::name("p2"), Expr::name("p1"))),
    );
    let model = transfer(desc, &inline());

    let independent = model.variables_by_kind(VariableKind::RealParameterIndependent);
    let dependent = model.variables_by_kind(VariableKind::RealParameterDependent);
    assert_eq!(independent.len(), 1);
    assert_eq!(dependent.len(), 3);
    assert_eq!(
        independent[0]
            .borrow()
            .attribute("bindingExpression")
            .unwrap()
            .to_string(),
        "Const<10>(scalar)"
    );
    assert_eq!(
        dependent[0]
            .borrow()
            .attribute("bindingExpression")
            .unwrap()
            .to_string(),
        "(Const<2>(scalar)*p1)"
    );

    model.calculate_values_for_dependent_parameters().unwrap();
    let value = |name: &str| {
        model
            .variable_by_name(name)
            .unwrap()
            .borrow()
            .attribute("evaluatedBindingExpression")
            .unwrap()
            .value()
            .unwrap()
    };
    assert_relative_eq!(value("p2"), 20.0);
    assert_relative_eq!(value("p3"), 20.0);
    assert_relative_eq!(value("p4"), 200.0);

    // re-running the pass is idempotent
    model.calculate_values_for_dependent_parameters().unwrap();
    assert_relative_eq!(value("p2"), 20.0);
    assert_relative_eq!(value("p4"), 200.0);
}

fn two_output_function(name: &str) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        inputs: vec![FunctionVariable::real("x")],
        outputs: vec![FunctionVariable::real("y1"), FunctionVariable::real("y2")],
        locals: vec![],
        statements: vec![
            Statement::assign("y1", Expr::name("x")),
            Statement::assign(
                "y2",
                Expr::binary(BinOp::Mul, Expr::num(2.0), Expr::name("x")),
            ),
        ],
    }
}

#[test]
fn function_call_equation_residual_without_inlining() {
    let mut desc = ModelDescription::new("AtomicModelFunctionCallEquation");
    desc.variables.push(VariableDecl::real("x1"));
    desc.variables.push(VariableDecl::real("x2"));
    desc.variables.push(VariableDecl::real("x3"));
    desc.functions
        .push(two_output_function("AtomicModelFunctionCallEquation.f"));
    desc.equations
        .push(Equation::simple(Expr::der("x1"), Expr::name("x1")));
    desc.equations.push(Equation::Call {
        targets: vec![
            Some(ComponentRef::name("x2")),
            Some(ComponentRef::name("x3")),
        ],
        function: "AtomicModelFunctionCallEquation.f".to_string(),
        args: vec![Expr::name("x1")],
    });
    let model = transfer(desc, &without_inlining());
    assert_eq!(
        model.dae_residual().to_string(),
        "vertcat((x1-der_x1),\
         (vertcat(function(\"AtomicModelFunctionCallEquation.f\").call([x1]){0},\
         function(\"AtomicModelFunctionCallEquation.f\").call([x1]){1})\
         -vertcat(x2,x3)))"
    );
    assert!(model
        .function_by_name("AtomicModelFunctionCallEquation.f")
        .is_some());
}

#[test]
fn model_functions_print_in_canonical_form() {
    let mut desc = ModelDescription::new("simpleModelWithFunctions");
    desc.variables.push(VariableDecl::real("u1"));
    desc.variables.push(VariableDecl::real("u2"));
    desc.variables.push(VariableDecl::real("a"));
    desc.variables.push(VariableDecl::real("b"));
    desc.functions.push(FunctionDecl {
        name: "simpleModelWithFunctions.f".to_string(),
        inputs: vec![FunctionVariable::real("x1"), FunctionVariable::real("x2")],
        outputs: vec![FunctionVariable::real("y1"), FunctionVariable::real("y2")],
        locals: vec![],
        statements: vec![Statement::CallAssign {
            targets: vec![
                Some(ComponentRef::name("y1")),
                Some(ComponentRef::name("y2")),
            ],
            function: "simpleModelWithFunctions.f2".to_string(),
            args: vec![Expr::name("x1"), Expr::name("x2")],
        }],
    });
    desc.functions.push(FunctionDecl {
        name: "simpleModelWithFunctions.f2".to_string(),
        inputs: vec![FunctionVariable::real("x1"), FunctionVariable::real("x2")],
        outputs: vec![FunctionVariable::real("y1"), FunctionVariable::real("y2")],
        locals: vec![FunctionVariable::real("z")],
        statements: vec![
            Statement::assign(
                "z",
                Expr::binary(BinOp::Mul, Expr::num(0.5), Expr::name("x1")),
            ),
            Statement::assign("y1", Expr::name("z")),
            Statement::assign(
                "y2",
                Expr::binary(BinOp::Add, Expr::name("x2"), Expr::name("z")),
            ),
        ],
    });
    desc.equations.push(Equation::Call {
        targets: vec![Some(ComponentRef::name("a")), Some(ComponentRef::name("b"))],
        function: "simpleModelWithFunctions.f".to_string(),
        args: vec![Expr::name("u1"), Expr::name("u2")],
    });
    let model = transfer(desc, &without_inlining());

    let expected_f = "ModelFunction : function(\"simpleModelWithFunctions.f\")\n\
                      \u{20}Inputs (2):\n\
                      \u{20} 0. 1-by-1 (dense)\n\
                      \u{20} 1. 1-by-1 (dense)\n\
                      \u{20}Outputs (2):\n\
                      \u{20} 0. 1-by-1 (dense)\n\
                      \u{20} 1. 1-by-1 (dense)\n\
                      @0 = input[0]\n\
                      @1 = input[1]\n\
                      {@2,@3} = function(\"simpleModelWithFunctions.f2\").call([@0,@1])\n\
                      output[0] = @2\n\
                      output[1] = @3\n";
    let expected_f2 = "ModelFunction : function(\"simpleModelWithFunctions.f2\")\n\
                       \u{20}Inputs (2):\n\
                       \u{20} 0. 1-by-1 (dense)\n\
                       \u{20} 1. 1-by-1 (dense)\n\
                       \u{20}Outputs (2):\n\
                       \u{20} 0. 1-by-1 (dense)\n\
                       \u{20} 1. 1-by-1 (dense)\n\
                       @0 = Const<0.5>(scalar)\n\
                       @1 = input[0]\n\
                       @0 = (@0*@1)\n\
                       output[0] = @0\n\
                       @2 = input[1]\n\
                       @0 = (@2+@0)\n\
                       output[1] = @0\n";
    assert_eq!(
        model
            .function_by_name("simpleModelWithFunctions.f")
            .unwrap()
            .to_string(),
        expected_f
    );
    assert_eq!(
        model
            .function_by_name("simpleModelWithFunctions.f2")
            .unwrap()
            .to_string(),
        expected_f2
    );
}

#[test]
fn statements_after_return_are_excluded() {
    let mut desc = ModelDescription::new("ReturnModel");
    desc.variables.push(VariableDecl::real("a"));
    desc.variables.push(VariableDecl::real("b"));
    desc.functions.push(FunctionDecl {
        name: "ReturnModel.f".to_string(),
        inputs: vec![FunctionVariable::real("x")],
        outputs: vec![FunctionVariable::real("y")],
        locals: vec![],
        statements: vec![
            Statement::assign("y", Expr::name("x")),
            Statement::Return,
            Statement::assign(
                "y",
                Expr::binary(BinOp::Mul, Expr::num(2.0), Expr::name("x")),
            ),
        ],
    });
    desc.equations.push(Equation::Call {
        targets: vec![Some(ComponentRef::name("a"))],
        function: "ReturnModel.f".to_string(),
        args: vec![Expr::name("b")],
    });
    let model = transfer(desc, &without_inlining());
    let expected = "ModelFunction : function(\"ReturnModel.f\")\n\
                    \u{20}Input: 1-by-1 (dense)\n\
                    \u{20}Output: 1-by-1 (dense)\n\
                    @0 = input[0]\n\
                    output[0] = @0\n";
    assert_eq!(
        model.function_by_name("ReturnModel.f").unwrap().to_string(),
        expected
    );
}

#[test]
fn call_equation_with_omitted_outputs() {
    let mut desc = ModelDescription::new("IgnoredOuts");
    desc.variables.push(VariableDecl::real("x1"));
    desc.variables.push(VariableDecl::real("x2"));
    desc.variables.push(VariableDecl::real("x3"));
    desc.functions.push(FunctionDecl {
        name: "IgnoredOuts.f".to_string(),
        inputs: vec![FunctionVariable::real("u"), FunctionVariable::real("v")],
        outputs: vec![
            FunctionVariable::real("o1"),
            FunctionVariable::real("o2"),
            FunctionVariable::real("o3"),
        ],
        locals: vec![],
        statements: vec![
            Statement::assign("o1", Expr::name("u")),
            Statement::assign("o2", Expr::name("v")),
            Statement::assign(
                "o3",
                Expr::binary(BinOp::Add, Expr::name("u"), Expr::name("v")),
            ),
        ],
    });
    desc.equations.push(Equation::Call {
        targets: vec![Some(ComponentRef::name("x1")), None, Some(ComponentRef::name("x2"))],
        function: "IgnoredOuts.f".to_string(),
        args: vec![Expr::num(1.0), Expr::name("x3")],
    });
    let model = transfer(desc, &without_inlining());
    assert_eq!(
        model.dae_residual().to_string(),
        "(vertcat(function(\"IgnoredOuts.f\").call([Const<1>(scalar),x3]){0},\
         function(\"IgnoredOuts.f\").call([Const<1>(scalar),x3]){2})\
         -vertcat(x1,x2))"
    );
}

#[test]
fn ignored_call_statement_outputs_print_null() {
    let mut desc = ModelDescription::new("IgnoredStmtOuts");
    desc.variables.push(VariableDecl::real("a"));
    desc.variables.push(VariableDecl::real("b"));
    desc.functions.push(FunctionDecl {
        name: "IgnoredStmtOuts.f".to_string(),
        inputs: vec![FunctionVariable::real("u"), FunctionVariable::real("v")],
        outputs: vec![
            FunctionVariable::real("o1"),
            FunctionVariable::real("o2"),
            FunctionVariable::real("o3"),
        ],
        locals: vec![],
        statements: vec![
            Statement::assign("o1", Expr::name("u")),
            Statement::assign("o2", Expr::name("v")),
            Statement::assign(
                "o3",
                Expr::binary(BinOp::Add, Expr::name("u"), Expr::name("v")),
            ),
        ],
    });
    desc.functions.push(FunctionDecl {
        name: "IgnoredStmtOuts.f2".to_string(),
        inputs: vec![FunctionVariable::real("x")],
        outputs: vec![FunctionVariable::real("y")],
        locals: vec![],
        statements: vec![Statement::CallAssign {
            targets: vec![None, None, Some(ComponentRef::name("y"))],
            function: "IgnoredStmtOuts.f".to_string(),
            args: vec![Expr::num(10.0), Expr::name("x")],
        }],
    });
    desc.equations.push(Equation::Call {
        targets: vec![Some(ComponentRef::name("a"))],
        function: "IgnoredStmtOuts.f2".to_string(),
        args: vec![Expr::name("b")],
    });
    let model = transfer(desc, &without_inlining());
    let expected = "ModelFunction : function(\"IgnoredStmtOuts.f2\")\n\
                    \u{20}Input: 1-by-1 (dense)\n\
                    \u{20}Output: 1-by-1 (dense)\n\
                    @0 = Const<10>(scalar)\n\
                    @1 = input[0]\n\
                    {NULL,NULL,@2} = function(\"IgnoredStmtOuts.f\").call([@0,@1])\n\
                    output[0] = @2\n";
    assert_eq!(
        model
            .function_by_name("IgnoredStmtOuts.f2")
            .unwrap()
            .to_string(),
        expected
    );
}

#[test]
fn array_derivative_routes_through_temporaries() {
    let mut desc = ModelDescription::new("AtomicModelVector1");
    desc.variables
        .push(VariableDecl::real("A").with_dims(&[2]));
    desc.functions.push(FunctionDecl {
        name: "AtomicModelVector1.f".to_string(),
        inputs: vec![FunctionVariable::real("x").with_dims(&[2])],
        outputs: vec![FunctionVariable::real("y").with_dims(&[2])],
        locals: vec![],
        statements: vec![Statement::assign(
            "y",
            Expr::unary(UnOp::Neg, Expr::name("x")),
        )],
    });
    desc.equations.push(Equation::simple(
        Expr::der("A"),
        Expr::call("AtomicModelVector1.f", vec![Expr::name("A")]),
    ));
    let model = transfer(desc, &without_inlining());
    assert_eq!(
        model.dae_residual().to_string(),
        "vertcat((vertcat(function(\"AtomicModelVector1.f\").call([A[1],A[2]]){0},\
         function(\"AtomicModelVector1.f\").call([A[1],A[2]]){1})\
         -vertcat(temp_1[1],temp_1[2])),\
         (temp_1[1]-der_A[1]),\
         (temp_1[2]-der_A[2]))"
    );
    assert_eq!(
        kind_names(&model, VariableKind::Differentiated),
        ["A[1]", "A[2]"]
    );
    assert_eq!(
        kind_names(&model, VariableKind::Derivative),
        ["der_A[1]", "der_A[2]"]
    );
    assert_eq!(
        kind_names(&model, VariableKind::RealAlgebraic),
        ["temp_1[1]", "temp_1[2]"]
    );
}

#[test]
fn record_valued_function_call_flattens_in_field_order() {
    let mut desc = ModelDescription::new("RecordModel");
    desc.records.push(RecordDecl {
        name: "R".to_string(),
        fields: vec![
            RecordField::new("a", TypeRef::Primitive(BaseType::Real)),
            RecordField::new("b", TypeRef::Primitive(BaseType::Real)).with_dims(&[2]),
        ],
    });
    desc.variables.push(VariableDecl::real("u"));
    desc.variables
        .push(VariableDecl::new("r", TypeRef::Record("R".to_string())));
    desc.functions.push(FunctionDecl {
        name: "RecordModel.f".to_string(),
        inputs: vec![FunctionVariable::real("x")],
        outputs: vec![FunctionVariable::new("y", TypeRef::Record("R".to_string()))],
        locals: vec![],
        statements: vec![Statement::assign(
            "y",
            Expr::Array(vec![
                Expr::name("x"),
                Expr::Array(vec![Expr::num(1.0), Expr::num(2.0)]),
            ]),
        )],
    });
    desc.equations.push(Equation::simple(
        Expr::name("r"),
        Expr::call("RecordModel.f", vec![Expr::name("u")]),
    ));
    let model = transfer(desc, &without_inlining());
    assert_eq!(
        model.dae_residual().to_string(),
        "(vertcat(function(\"RecordModel.f\").call([u]){0},\
         function(\"RecordModel.f\").call([u]){1},\
         function(\"RecordModel.f\").call([u]){2})\
         -vertcat(r.a,r.b[1],r.b[2]))"
    );
}

#[test]
fn three_dimensional_arrays_flatten_row_major() {
    let mut desc = ModelDescription::new("Arrays");
    desc.variables
        .push(VariableDecl::real("A").with_dims(&[1, 2, 3]));
    let model = transfer(desc, &inline());
    assert_eq!(
        kind_names(&model, VariableKind::RealAlgebraic),
        [
            "A[1,1,1]", "A[1,1,2]", "A[1,1,3]", "A[1,2,1]", "A[1,2,2]", "A[1,2,3]"
        ]
    );
}

#[test]
fn elementary_functions_lower_to_canonical_operators() {
    let mut desc = ModelDescription::new("AtomicModelElementaryFunctions");
    for name in ["x1", "x2", "x3", "x4"] {
        desc.variables.push(VariableDecl::real(name));
    }
    desc.equations.push(Equation::simple(
        Expr::der("x1"),
        Expr::binary(BinOp::Pow, Expr::name("x1"), Expr::num(5.0)),
    ));
    desc.equations.push(Equation::simple(
        Expr::der("x2"),
        Expr::call("abs", vec![Expr::name("x2")]),
    ));
    desc.equations.push(Equation::simple(
        Expr::der("x3"),
        Expr::call("min", vec![Expr::name("x3"), Expr::name("x2")]),
    ));
    desc.equations.push(Equation::simple(
        Expr::der("x4"),
        Expr::call("log10", vec![Expr::name("x4")]),
    ));
    let model = transfer(desc, &inline());
    assert_eq!(
        model.dae_residual().to_string(),
        "vertcat((pow(x1,Const<5>(scalar))-der_x1),\
         (fabs(x2)-der_x2),\
         (fmin(x3,x2)-der_x3),\
         ((Const<0.434294>(scalar)*log(x4))-der_x4))"
    );
}

#[test]
fn boolean_and_conditional_expressions() {
    let mut desc = ModelDescription::new("AtomicModelBooleanExpressions");
    desc.variables.push(VariableDecl::real("x1"));
    desc.variables.push(VariableDecl::boolean("x2"));
    desc.variables.push(VariableDecl::boolean("x3"));
    desc.variables.push(VariableDecl::boolean("x4"));
    desc.equations.push(Equation::simple(
        Expr::der("x1"),
        Expr::if_then_else(Expr::name("x2"), Expr::num(1.0), Expr::num(2.0)),
    ));
    desc.equations.push(Equation::simple(
        Expr::name("x2"),
        Expr::binary(BinOp::Lt, Expr::num(0.0), Expr::name("x1")),
    ));
    // x1 > 0 canonicalizes by operand swap
    desc.equations.push(Equation::simple(
        Expr::name("x3"),
        Expr::binary(BinOp::Gt, Expr::name("x1"), Expr::num(0.0)),
    ));
    desc.equations.push(Equation::simple(
        Expr::name("x4"),
        Expr::binary(BinOp::And, Expr::name("x2"), Expr::name("x3")),
    ));
    let model = transfer(desc, &inline());
    assert_eq!(
        model.dae_residual().to_string(),
        "vertcat((((x2?Const<1>(scalar):0)+((!x2)?Const<2>(scalar):0))-der_x1),\
         ((Const<0>(scalar)<x1)-x2),\
         ((Const<0>(scalar)<x1)-x3),\
         ((x2&&x3)-x4))"
    );
    assert_eq!(
        kind_names(&model, VariableKind::BooleanDiscrete),
        ["x2", "x3", "x4"]
    );
}

#[test]
fn array_parameter_bound_by_function_call_mediates_through_temporaries() {
    let mut desc = ModelDescription::new("PolyOut");
    desc.variables.push(
        VariableDecl::real("p1")
            .with_variability(Variability::Parameter)
            .with_binding(Expr::num(2.0)),
    );
    desc.variables.push(
        VariableDecl::real("p2")
            .with_dims(&[2])
            .with_variability(Variability::Parameter)
            .with_binding(Expr::call("PolyOut.f", vec![Expr::name("p1")])),
    );
    desc.functions.push(FunctionDecl {
        name: "PolyOut.f".to_string(),
        inputs: vec![FunctionVariable::real("x")],
        outputs: vec![FunctionVariable::real("y").with_dims(&[2])],
        locals: vec![],
        statements: vec![Statement::assign(
            "y",
            Expr::Array(vec![
                Expr::name("x"),
                Expr::binary(BinOp::Mul, Expr::num(2.0), Expr::name("x")),
            ]),
        )],
    });
    let model = transfer(desc, &without_inlining());
    model.calculate_values_for_dependent_parameters().unwrap();

    let dependent = model.variables_by_kind(VariableKind::RealParameterDependent);
    let printed: Vec<String> = dependent.iter().map(|v| v.borrow().to_string()).collect();
    assert_eq!(
        printed,
        [
            "temp_1[1], declaredType : Real, attributes:\
             \n\tbindingExpression = function(\"PolyOut.f\").call([p1]){0}\
             \n\tevaluatedBindingExpression = Const<2>(scalar)",
            "temp_1[2], declaredType : Real, attributes:\
             \n\tbindingExpression = function(\"PolyOut.f\").call([p1]){1}\
             \n\tevaluatedBindingExpression = Const<4>(scalar)",
            "p2[1], declaredType : Real, attributes:\
             \n\tbindingExpression = temp_1[1]\
             \n\tevaluatedBindingExpression = Const<2>(scalar)",
            "p2[2], declaredType : Real, attributes:\
             \n\tbindingExpression = temp_1[2]\
             \n\tevaluatedBindingExpression = Const<4>(scalar)",
        ]
    );
}

#[test]
fn inlining_expands_calls_and_leaves_no_function_table() {
    let mut desc = ModelDescription::new("InlineModel");
    desc.variables.push(VariableDecl::real("u"));
    desc.variables.push(VariableDecl::real("x"));
    desc.functions.push(FunctionDecl {
        name: "InlineModel.f".to_string(),
        inputs: vec![FunctionVariable::real("a")],
        outputs: vec![FunctionVariable::real("y")],
        locals: vec![],
        statements: vec![Statement::assign(
            "y",
            Expr::binary(BinOp::Mul, Expr::num(2.0), Expr::name("a")),
        )],
    });
    desc.equations.push(Equation::simple(
        Expr::name("x"),
        Expr::call("InlineModel.f", vec![Expr::name("u")]),
    ));
    let model = transfer(desc, &inline());
    assert_eq!(
        model.dae_residual().to_string(),
        "((Const<2>(scalar)*u)-x)"
    );
    assert!(model.function_by_name("InlineModel.f").is_none());
    assert!(model.functions().is_empty());
}

fn optimization_base() -> ModelDescription {
    let mut desc = ModelDescription::new("atomicOptimization");
    desc.variables.push(VariableDecl::real("x1"));
    desc.equations
        .push(Equation::simple(Expr::der("x1"), Expr::name("x1")));
    desc
}

#[test]
fn optimization_horizon_and_constraints() {
    let mut opt = OptimizationDescription::new(optimization_base());
    opt.start_time = TimePoint::Literal(5.0);
    opt.final_time = TimePoint::Literal(10.0);
    opt.constraints.push(ConstraintDecl {
        kind: RelationKind::Leq,
        lhs: Expr::name("x1"),
        rhs: Expr::num(1.0),
    });
    opt.constraints.push(ConstraintDecl {
        kind: RelationKind::Geq,
        lhs: Expr::name("x1"),
        rhs: Expr::num(1.0),
    });
    let problem = transfer_optimization_problem(
        "atomicOptimization",
        &FlatSource::from_optimization(opt),
        &inline(),
    )
    .unwrap();

    assert_eq!(problem.start_time().value(), Some(5.0));
    assert_eq!(problem.final_time().value(), Some(10.0));
    let printed: Vec<String> = problem
        .path_constraints()
        .iter()
        .map(|c| c.to_string())
        .collect();
    assert_eq!(
        printed,
        ["x1 <= Const<1>(scalar)", "x1 >= Const<1>(scalar)"]
    );
    // the wrapped model behaves like a plain transfer
    assert_eq!(problem.model().dae_residual().to_string(), "(x1-der_x1)");
}

#[test]
fn objective_terms_default_to_zero() {
    let opt = OptimizationDescription::new(optimization_base());
    let problem = transfer_optimization_problem(
        "atomicOptimization",
        &FlatSource::from_optimization(opt),
        &inline(),
    )
    .unwrap();
    assert_eq!(problem.lagrange_term().to_string(), "Const<0>(scalar)");
    assert_eq!(problem.mayer_term().to_string(), "Const<0>(scalar)");
}

#[test]
fn free_final_time_is_symbolic_and_usable_in_the_mayer_term() {
    let mut opt = OptimizationDescription::new(optimization_base());
    opt.final_time = TimePoint::Free;
    opt.mayer = Some(Expr::name("finalTime"));
    opt.lagrange = Some(Expr::name("x1"));
    let problem = transfer_optimization_problem(
        "atomicOptimization",
        &FlatSource::from_optimization(opt),
        &inline(),
    )
    .unwrap();
    assert_eq!(problem.final_time().to_string(), "finalTime");
    assert_eq!(problem.mayer_term().to_string(), "finalTime");
    assert_eq!(problem.lagrange_term().to_string(), "x1");
}

#[test]
fn unknown_names_surface_as_typed_errors() {
    let source = FlatSource::from_model(ModelDescription::new("M"));
    let err = transfer_model("Nope", &source, &inline()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<TransferError>(),
        Some(&TransferError::ModelNotFound {
            name: "Nope".to_string()
        })
    );

    let mut desc = ModelDescription::new("M");
    desc.variables
        .push(VariableDecl::new("v", TypeRef::Declared("Nope".to_string())));
    let err = transfer_model("M", &FlatSource::from_model(desc), &inline()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<TransferError>(),
        Some(&TransferError::UnknownType {
            name: "Nope".to_string()
        })
    );

    let mut desc = ModelDescription::new("M");
    desc.variables.push(VariableDecl::real("x"));
    desc.equations
        .push(Equation::simple(Expr::name("x"), Expr::name("ghost")));
    let err = transfer_model("M", &FlatSource::from_model(desc), &inline()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<TransferError>(),
        Some(&TransferError::UnknownVariable {
            name: "ghost".to_string()
        })
    );
}

#[test]
fn alias_cycles_are_fatal() {
    let mut desc = ModelDescription::new("M");
    desc.variables
        .push(VariableDecl::real("x").with_alias("y", false));
    desc.variables
        .push(VariableDecl::real("y").with_alias("x", false));
    desc.variables.push(VariableDecl::real("w"));
    desc.equations
        .push(Equation::simple(Expr::name("w"), Expr::name("x")));
    let err = transfer_model("M", &FlatSource::from_model(desc), &inline()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TransferError>(),
        Some(TransferError::InvalidAliasGraph { .. })
    ));
}

#[test]
fn unassigned_function_output_is_an_extraction_error() {
    let mut desc = ModelDescription::new("M");
    desc.variables.push(VariableDecl::real("a"));
    desc.variables.push(VariableDecl::real("b"));
    desc.functions.push(FunctionDecl {
        name: "M.f".to_string(),
        inputs: vec![FunctionVariable::real("x")],
        outputs: vec![FunctionVariable::real("y")],
        locals: vec![],
        statements: vec![],
    });
    desc.equations.push(Equation::Call {
        targets: vec![Some(ComponentRef::name("a"))],
        function: "M.f".to_string(),
        args: vec![Expr::name("b")],
    });
    let err = transfer_model("M", &FlatSource::from_model(desc), &inline()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<TransferError>(),
        Some(&TransferError::FunctionExtraction {
            function: "M.f".to_string(),
            detail: "output y is never assigned".to_string()
        })
    );
}

#[test]
fn input_variables_classify_by_causality() {
    let mut desc = ModelDescription::new("Inputs");
    desc.variables
        .push(VariableDecl::real("u").with_causality(Causality::Input));
    desc.variables
        .push(VariableDecl::integer("i").with_causality(Causality::Input));
    desc.variables
        .push(VariableDecl::boolean("flag").with_causality(Causality::Input));
    desc.variables
        .push(VariableDecl::real("c").with_variability(Variability::Constant).with_binding(Expr::num(3.14)));
    desc.variables
        .push(VariableDecl::real("d").with_variability(Variability::Discrete));
    let model = transfer(desc, &inline());
    assert_eq!(kind_names(&model, VariableKind::RealInput), ["u"]);
    assert_eq!(kind_names(&model, VariableKind::IntegerInput), ["i"]);
    assert_eq!(kind_names(&model, VariableKind::BooleanInput), ["flag"]);
    assert_eq!(kind_names(&model, VariableKind::RealConstant), ["c"]);
    assert_eq!(kind_names(&model, VariableKind::RealDiscrete), ["d"]);
    assert_relative_eq!(model.evaluate_expression(&MX::sym("c")).unwrap(), 3.14);
}
