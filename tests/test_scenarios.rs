use approx::assert_abs_diff_eq;
use marionette::canonical::Canonicalizer;
use marionette::symbolic::{matrix, Environment, Expr};
use marionette::{
    Dof, EquationOptions, GenerationConfig, GeneratorKind, Graph, LoopKind, MarionetteError, Shape, System,
};

const GRAVITY: f64 = 9.81;
const KINDS: [GeneratorKind; 3] = [GeneratorKind::Explicit, GeneratorKind::Recursive, GeneratorKind::OrderN];

fn qdd(system: &System, kind: GeneratorKind) -> Vec<f64> {
    let graph = system.generate(kind, &GenerationConfig::default()).unwrap();
    let n = graph.variable("qdd").unwrap().shape().len();
    graph.evaluate(&Environment::new()).unwrap().vector("qdd", n).unwrap()
}

#[test]
fn test_pendulum() {
    let (mass, length, inertia, q0) = (1.5, 0.8, 0.04, 0.6);
    let mut system = System::new();
    system.set_gravity(matrix::numbers(&[0.0, -GRAVITY, 0.0])).unwrap();
    let mut tensor = matrix::zeros(3, 3);
    tensor[[2, 2]] = Expr::number(inertia);
    let bob = system
        .add_body("bob", mass, matrix::numbers(&[0.0, -length, 0.0]), tensor)
        .unwrap();
    let pivot = system.origin(system.world()).unwrap();
    let hinge = system.add_joint("hinge", pivot, bob, &[Dof::Rz]).unwrap();
    system.set_initial(hinge, &[q0], &[0.0]).unwrap();

    let expected_mass = inertia + mass * length * length;
    let expected = -mass * GRAVITY * length * q0.sin() / expected_mass;
    for kind in [GeneratorKind::Explicit, GeneratorKind::Recursive] {
        let graph = system.generate(kind, &GenerationConfig::default()).unwrap();
        let env = graph.evaluate(&Environment::new()).unwrap();
        assert_abs_diff_eq!(env.matrix("M", 1, 1).unwrap()[[0, 0]], expected_mass, epsilon = 1e-12);
        assert_abs_diff_eq!(env.vector("qdd", 1).unwrap()[0], expected, epsilon = 1e-10);
        assert_abs_diff_eq!(env.vector("der_q", 1).unwrap()[0], 0.0);
    }
    assert_abs_diff_eq!(qdd(&system, GeneratorKind::OrderN)[0], expected, epsilon = 1e-10);
}

#[test]
fn test_mass_spring_damper() {
    let mut system = System::new();
    let stiffness = system.add_parameter("c", 40.0).unwrap();
    let damping = system.add_parameter("d", 1.5).unwrap();
    let cart = system
        .add_body("cart", 2.0, matrix::zeros(3, 1), matrix::identity(3))
        .unwrap();
    let origin = system.origin(system.world()).unwrap();
    let slide = system.add_joint("slide", origin, cart, &[Dof::Tx]).unwrap();
    system.set_initial(slide, &[0.1], &[0.5]).unwrap();
    let q = system.joint_coordinate(slide, 0).unwrap();
    let qd = system.joint_coordinate(slide, 1).unwrap();
    let force = -(&(&stiffness * &q) + &(&damping * &qd));
    system
        .add_joint_load("spring_damper", slide, matrix::column([force]))
        .unwrap();

    let expected_force = -(40.0 * 0.1 + 1.5 * 0.5);
    for kind in [GeneratorKind::Explicit, GeneratorKind::Recursive] {
        let graph = system.generate(kind, &GenerationConfig::default()).unwrap();
        let env = graph.evaluate(&Environment::new()).unwrap();
        assert_abs_diff_eq!(env.matrix("M", 1, 1).unwrap()[[0, 0]], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(env.vector("h", 1).unwrap()[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(env.vector("f", 1).unwrap()[0], expected_force, epsilon = 1e-12);
    }
    for kind in KINDS {
        assert_abs_diff_eq!(qdd(&system, kind)[0], expected_force / 2.0, epsilon = 1e-12);
    }

    // parameters can be overridden at evaluation time
    let graph = system
        .generate(GeneratorKind::Recursive, &GenerationConfig::default())
        .unwrap();
    let mut env = Environment::new();
    env.set("c", 10.0);
    let env = graph.evaluate(&env).unwrap();
    assert_abs_diff_eq!(env.vector("qdd", 1).unwrap()[0], -(1.0 + 0.75) / 2.0, epsilon = 1e-12);
}

/// Ground 1.0, crank 0.4, coupler 1.1, rocker 0.8, all turning about z
fn four_bar(posture: i8) -> System {
    let mut system = System::new();
    system.set_gravity(matrix::numbers(&[0.0, -GRAVITY, 0.0])).unwrap();
    let world = system.origin(system.world()).unwrap();
    let mut link = |name: &str, length: f64| {
        system
            .add_body(name, length, matrix::numbers(&[length / 2.0, 0.0, 0.0]), matrix::identity(3).mapv(|e| e * 0.01))
            .unwrap()
    };
    let (crank, coupler, rocker) = (link("crank", 0.4), link("coupler", 1.1), link("rocker", 0.8));
    let crank_end = system
        .add_frame("crank_end", system.origin(crank).unwrap(), matrix::numbers(&[0.4, 0.0, 0.0]), None)
        .unwrap();
    let ground_end = system
        .add_frame("ground_end", world, matrix::numbers(&[1.0, 0.0, 0.0]), None)
        .unwrap();
    let input = system.add_joint("ja", world, crank, &[Dof::Rz]).unwrap();
    system.add_joint("jb", crank_end, coupler, &[Dof::Rz]).unwrap();
    system.add_joint("jd", ground_end, rocker, &[Dof::Rz]).unwrap();
    system.set_initial(input, &[0.7], &[1.0]).unwrap();
    let c3 = system
        .add_frame("c3", system.origin(coupler).unwrap(), matrix::numbers(&[1.1, 0.0, 0.0]), None)
        .unwrap();
    let c4 = system
        .add_frame("c4", system.origin(rocker).unwrap(), matrix::numbers(&[0.8, 0.0, 0.0]), None)
        .unwrap();
    system
        .add_loop("linkage", LoopKind::FourBar { a: c3, b: c4, posture })
        .unwrap();
    system
}

#[test]
fn test_four_bar_postures_close_the_loop() {
    let config = GenerationConfig::default()
        .with_kinematics_only(true)
        .with_graph_optimize(false);
    let mut angles = vec![];
    for posture in [1, -1] {
        let graph = four_bar(posture).generate(GeneratorKind::Explicit, &config).unwrap();
        assert_eq!(graph.variable("q").unwrap().shape(), Shape::Vector(1));
        let mut env = Environment::new();
        env.set_vector("qdd", &[0.0]);
        let env = graph.evaluate(&env).unwrap();
        let (qa, qb, qd) = (
            env.get("q_ja").unwrap(),
            env.get("q_jb").unwrap(),
            env.get("q_jd").unwrap(),
        );
        // A + l2·e(qa) + l3·e(qa + qb) = D + l4·e(qd)
        let x = 0.4 * qa.cos() + 1.1 * (qa + qb).cos();
        let y = 0.4 * qa.sin() + 1.1 * (qa + qb).sin();
        assert_abs_diff_eq!(x, 1.0 + 0.8 * qd.cos(), epsilon = 1e-10);
        assert_abs_diff_eq!(y, 0.8 * qd.sin(), epsilon = 1e-10);
        angles.push(qb);
    }
    assert!((angles[0] - angles[1]).abs() > 1e-3);
}

#[test]
fn test_four_bar_dynamics_agree() {
    for posture in [1, -1] {
        let system = four_bar(posture);
        let reference = qdd(&system, GeneratorKind::Explicit);
        assert_eq!(reference.len(), 1);
        for kind in [GeneratorKind::Recursive, GeneratorKind::OrderN] {
            assert_abs_diff_eq!(qdd(&system, kind)[0], reference[0], epsilon = 1e-8);
        }
    }
}

#[test]
fn test_fixed_joint_merge() {
    let mut system = System::new();
    let (m_a, m_b) = (2.0, 0.5);
    let a = system
        .add_body("a", m_a, matrix::zeros(3, 1), matrix::identity(3))
        .unwrap();
    let b = system
        .add_body("b", m_b, matrix::zeros(3, 1), matrix::identity(3).mapv(|e| e * 0.2))
        .unwrap();
    let origin = system.origin(system.world()).unwrap();
    system.add_joint("swing", origin, a, &[Dof::Rz]).unwrap();
    let mount = system
        .add_frame("mount", system.origin(a).unwrap(), matrix::numbers(&[0.3, 0.4, 0.0]), None)
        .unwrap();
    let weld = system.add_joint("weld", mount, b, &[]).unwrap();

    let mut canonicalizer = Canonicalizer::new(&system);
    canonicalizer.merge_fixed_joint(weld).unwrap();
    assert!(matches!(
        canonicalizer.merge_fixed_joint(weld),
        Err(MarionetteError::AlreadyMerged(_))
    ));
    let model = canonicalizer.finish().unwrap();
    assert_eq!(model.len(), 2);

    let merged = &model.node(b).unwrap().get().body;
    assert_eq!(merged.name, "a");
    let env = Environment::new();
    let value = |e: &Expr| e.evaluate(&env).unwrap();
    assert_abs_diff_eq!(value(&merged.mass), m_a + m_b);
    let total = m_a + m_b;
    assert_abs_diff_eq!(value(&merged.cg[[0, 0]]), m_b * 0.3 / total, epsilon = 1e-12);
    assert_abs_diff_eq!(value(&merged.cg[[1, 0]]), m_b * 0.4 / total, epsilon = 1e-12);
    // I_A + I_B + m_B·(|d|²·1 − d·dᵀ), |d|² = 0.25
    assert_abs_diff_eq!(value(&merged.inertia[[0, 0]]), 1.0 + 0.2 + m_b * (0.25 - 0.09), epsilon = 1e-12);
    assert_abs_diff_eq!(value(&merged.inertia[[0, 1]]), -m_b * 0.12, epsilon = 1e-12);
    assert_abs_diff_eq!(value(&merged.inertia[[2, 2]]), 1.0 + 0.2 + m_b * 0.25, epsilon = 1e-12);
}

#[test]
fn test_names_are_shared_across_entity_kinds() {
    let mut system = System::new();
    let arm = system
        .add_body("arm", 1.0, matrix::zeros(3, 1), matrix::identity(3))
        .unwrap();
    let origin = system.origin(arm).unwrap();
    assert!(matches!(
        system.add_frame("arm", origin, matrix::zeros(3, 1), None),
        Err(MarionetteError::NameCollision(name)) if name == "arm"
    ));
    assert!(matches!(
        system.add_parameter("arm", 1.0),
        Err(MarionetteError::NameCollision(_))
    ));

    // generated names collide with user symbols at generation time
    let world = system.origin(system.world()).unwrap();
    system.add_joint("shoulder", world, arm, &[Dof::Rz]).unwrap();
    system.add_parameter("qd", 1.0).unwrap();
    for kind in KINDS {
        assert!(matches!(
            system.generate(kind, &GenerationConfig::default()),
            Err(MarionetteError::NameCollision(name)) if name == "qd"
        ));
    }
}

#[test]
fn test_shape_mismatch() {
    let mut graph = Graph::new();
    let options = EquationOptions::default().with_shape(Shape::Vector(3));
    assert!(matches!(
        graph.add_equation("x", matrix::numbers(&[1.0, 2.0]), options),
        Err(MarionetteError::ShapeMismatch { .. })
    ));
    // 1×1 and scalar are the same shape
    let scalar = EquationOptions::default().with_shape(Shape::Scalar);
    graph.add_equation("y", matrix::numbers(&[1.0]), scalar).unwrap();
    let column = EquationOptions::default().with_shape(Shape::Vector(1));
    graph.add_equation("z", matrix::scalar(2.0), column).unwrap();
    // a variable is assigned once
    assert!(graph
        .add_equation("y", matrix::numbers(&[1.0, 2.0]), EquationOptions::default())
        .is_err());
}

#[test]
fn test_optimization_keeps_user_symbols_apart() {
    let mut system = System::new();
    system.set_gravity(matrix::numbers(&[0.0, -GRAVITY, 0.0])).unwrap();
    let mass = system.add_parameter("_cse0", 1.5).unwrap();
    let mut tensor = matrix::zeros(3, 3);
    tensor[[2, 2]] = Expr::number(0.04);
    let bob = system
        .add_body("bob", mass, matrix::numbers(&[0.0, -0.8, 0.0]), tensor)
        .unwrap();
    let pivot = system.origin(system.world()).unwrap();
    let hinge = system.add_joint("hinge", pivot, bob, &[Dof::Rz]).unwrap();
    system.set_initial(hinge, &[0.6], &[1.2]).unwrap();

    for kind in KINDS {
        let evaluate = |optimize: bool| {
            let config = GenerationConfig::default().with_graph_optimize(optimize);
            let graph = system.generate(kind, &config).unwrap();
            graph.evaluate(&Environment::new()).unwrap().vector("qdd", 1).unwrap()[0]
        };
        assert_abs_diff_eq!(evaluate(true), evaluate(false), epsilon = 1e-12);
    }
    let expected = -1.5 * GRAVITY * 0.8 * (0.6f64).sin() / (0.04 + 1.5 * 0.64);
    assert_abs_diff_eq!(qdd(&system, GeneratorKind::Recursive)[0], expected, epsilon = 1e-10);
}
