//! Tests for the board model.

use strictly_arena::{Board, BoardError, Player, Position, Square, rules};

#[test]
fn test_position_numbers() {
    assert_eq!(Position::TopLeft.number(), 1);
    assert_eq!(Position::Center.number(), 5);
    assert_eq!(Position::BottomRight.number(), 9);
    assert_eq!(Position::from_number(0), None);
    assert_eq!(Position::from_number(10), None);
    assert_eq!(Position::from_number(7), Some(Position::BottomLeft));
    assert_eq!(Position::from_index(4), Some(Position::Center));
}

#[test]
fn test_apply_marks_one_square() {
    let mut board = Board::new();
    assert_eq!(board.apply(5, Player::X), Ok(Position::Center));
    assert_eq!(board.get(Position::Center), Square::Occupied(Player::X));
    assert_eq!(board.count(Player::X), 1);
    assert_eq!(board.count(Player::O), 0);
    assert_eq!(board.cells(), "....X....");
}

#[test]
fn test_apply_rejections_leave_board_alone() {
    let mut board = Board::new();
    board.apply(1, Player::X).unwrap();
    let before = board.clone();

    assert_eq!(board.apply(1, Player::O), Err(BoardError::Occupied));
    assert_eq!(board.apply(0, Player::O), Err(BoardError::OutOfRange));
    assert_eq!(board.apply(10, Player::O), Err(BoardError::OutOfRange));
    assert_eq!(board, before);
}

#[test]
fn test_valid_moves_filters_occupied() {
    let mut board = Board::new();
    board.apply(1, Player::X).unwrap();
    board.apply(5, Player::O).unwrap();

    let valid = Position::valid_moves(&board);
    assert_eq!(valid.len(), 7);
    assert!(!valid.contains(&Position::TopLeft));
    assert!(!valid.contains(&Position::Center));
    assert!(valid.contains(&Position::BottomRight));
}

#[test]
fn test_display_grid() {
    let mut board = Board::new();
    board.apply(1, Player::X).unwrap();
    board.apply(9, Player::O).unwrap();
    assert_eq!(board.display(), "X|2|3\n-+-+-\n4|5|6\n-+-+-\n7|8|O");
}

/// Collinearity oracle on grid coordinates, independent of the line table.
fn has_three_in_a_row(marks: &[Position]) -> bool {
    let coords: Vec<(i32, i32)> = marks
        .iter()
        .map(|p| {
            let i = p.to_index() as i32;
            (i / 3, i % 3)
        })
        .collect();
    for a in 0..coords.len() {
        for b in a + 1..coords.len() {
            for c in b + 1..coords.len() {
                let (r1, c1) = coords[a];
                let (r2, c2) = coords[b];
                let (r3, c3) = coords[c];
                let same_row = r1 == r2 && r2 == r3;
                let same_col = c1 == c2 && c2 == c3;
                let main_diag = [r1 - c1, r2 - c2, r3 - c3] == [0, 0, 0];
                let anti_diag = [r1 + c1, r2 + c2, r3 + c3] == [2, 2, 2];
                if same_row || same_col || main_diag || anti_diag {
                    return true;
                }
            }
        }
    }
    false
}

fn explore(board: &mut Board, to_move: Player, visited: &mut usize) {
    *visited += 1;
    for player in Player::ALL {
        let marks: Vec<Position> = Position::ALL
            .into_iter()
            .filter(|p| board.get(*p) == Square::Occupied(player))
            .collect();
        assert_eq!(
            board.winner() == Some(player),
            has_three_in_a_row(&marks),
            "board {}",
            board.cells()
        );
    }
    assert_eq!(
        rules::is_draw(board),
        board.is_full() && board.winner().is_none()
    );

    if board.winner().is_some() || board.is_full() {
        return;
    }
    for pos in Position::valid_moves(board) {
        board.set(pos, Square::Occupied(to_move));
        explore(board, to_move.opponent(), visited);
        board.set(pos, Square::Empty);
    }
}

#[test]
fn test_winner_matches_geometry_for_every_reachable_board() {
    let mut board = Board::new();
    let mut visited = 0;
    explore(&mut board, Player::X, &mut visited);
    // Number of nodes in the full tic-tac-toe game tree, root included.
    assert_eq!(visited, 549_946);
}
